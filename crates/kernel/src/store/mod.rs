//! Durable post storage.
//!
//! The pipeline treats the store as synchronous and single-attempt: every
//! call either lands or fails, and failures are surfaced without retry.

mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Post;

pub use memory::MemoryPostStore;
pub use postgres::PgPostStore;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record changed since it was read.
    #[error("post {0} was modified concurrently")]
    Conflict(Uuid),

    /// The record no longer exists.
    #[error("post {0} not found")]
    NotFound(Uuid),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// CRUD operations on posts.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a new post, returning its ID.
    async fn create(&self, post: &Post) -> Result<Uuid, StoreError>;

    /// Load a post by ID.
    async fn read(&self, id: Uuid) -> Result<Option<Post>, StoreError>;

    /// Write `post` over the stored record whose version equals
    /// `post.version`, returning the record as stored (version bumped).
    /// Fails with `NotFound` when the record is gone and `Conflict` when its
    /// version moved on.
    async fn update(&self, post: &Post) -> Result<Post, StoreError>;

    /// Remove a post. Returns false when nothing was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> bool;
}
