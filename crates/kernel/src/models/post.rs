//! Post model and input validation.
//!
//! Posts are the only resource the API serves: owned by one subject,
//! mutable by that owner, and versioned for optimistic concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum content length in characters.
pub const MAX_CONTENT_LEN: usize = 1000;

/// Maximum number of tags on a post.
pub const MAX_TAGS: usize = 10;

/// Maximum tag length in characters.
pub const MAX_TAG_LEN: usize = 32;

/// Post record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    /// Unique identifier (UUIDv7).
    pub id: Uuid,

    /// Subject of the identity that created the post.
    pub owner_id: String,

    pub title: String,

    pub content: String,

    pub tags: Vec<String>,

    /// Incremented on every successful update.
    pub version: i32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a post.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Request body for a partial update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl Post {
    /// Build a new, not-yet-stored post owned by `owner_id`.
    pub fn new(owner_id: &str, input: NewPost) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id: owner_id.to_string(),
            title: input.title.trim().to_string(),
            content: input.content,
            tags: normalize_tags(input.tags),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, subject: &str) -> bool {
        self.owner_id == subject
    }

    /// Apply a validated patch, returning the updated copy.
    ///
    /// The version is left as read; the store bumps it when the write lands.
    pub fn patched(&self, patch: PostPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = patch.title {
            next.title = title.trim().to_string();
        }
        if let Some(content) = patch.content {
            next.content = content;
        }
        if let Some(tags) = patch.tags {
            next.tags = normalize_tags(tags);
        }
        next.updated_at = Utc::now();
        next
    }
}

impl NewPost {
    /// Check field constraints. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        validate_title(&self.title)?;
        validate_content(&self.content)?;
        validate_tags(&self.tags)
    }
}

impl PostPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none()
    }

    /// Check field constraints for the fields present.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("at least one of title, content, or tags is required".to_string());
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(content) = &self.content {
            validate_content(content)?;
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        Ok(())
    }
}

/// Parse a post ID from a path segment.
pub fn parse_post_id(raw: &str) -> Result<Uuid, String> {
    Uuid::parse_str(raw.trim()).map_err(|_| format!("invalid post id: {raw:?}"))
}

fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("title is required".to_string());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(format!("title must be at most {MAX_TITLE_LEN} characters"));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("content is required".to_string());
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(format!(
            "content must be at most {MAX_CONTENT_LEN} characters"
        ));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), String> {
    if tags.len() > MAX_TAGS {
        return Err(format!("at most {MAX_TAGS} tags are allowed"));
    }
    for tag in tags {
        if tag.trim().is_empty() {
            return Err("tags must not be blank".to_string());
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(format!("tags must be at most {MAX_TAG_LEN} characters"));
        }
    }
    Ok(())
}

/// Trim tags and drop duplicates, keeping first-seen order.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
