//! Murmur test utilities.
//!
//! Fixture builders for post payloads, `Authorization` header helpers, a
//! hand-driven limiter clock, and assertion utilities for JSON responses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use murmur_kernel::middleware::Clock;

/// Rate limiter clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Create a post payload with default content.
pub fn test_post(title: &str) -> TestPost {
    TestPost {
        title: title.to_string(),
        content: "Written by the test suite.".to_string(),
        tags: Vec::new(),
    }
}

/// A post payload builder for create requests.
#[derive(Debug, Clone)]
pub struct TestPost {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl TestPost {
    /// Set the content.
    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "title": self.title,
            "content": self.content,
            "tags": self.tags,
        })
    }

    /// Serialized request body.
    pub fn body(&self) -> String {
        self.to_json().to_string()
    }
}

/// Body for a PATCH that only changes the title.
pub fn title_patch(title: &str) -> String {
    json!({ "title": title }).to_string()
}

/// `Authorization` value for a bearer token.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// `Authorization` value for a basic username/password pair.
pub fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// A client address unique to one test, for isolated rate-limit buckets.
pub fn unique_client_ip() -> String {
    let bytes = Uuid::now_v7().into_bytes();
    format!("10.{}.{}.{}", bytes[13], bytes[14], bytes[15])
}

/// Assertion helpers for JSON content.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that an error body carries the given machine-readable kind.
    pub fn error_kind(value: &Value, kind: &str) {
        assert_eq!(
            value.get("error").and_then(Value::as_str),
            Some(kind),
            "Expected error kind '{kind}', got: {value}"
        );
        has_key(value, "message");
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }
}
