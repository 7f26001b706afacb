//! Read-through post cache.
//!
//! [`CacheStore`] is a typed façade over a string key/value [`CacheBackend`]
//! with TTL support. Three backends exist: Redis (shared across instances),
//! moka (in-process), and a null backend used when caching is disabled.
//!
//! Invalidation failures leave a local tombstone for the post ID. A
//! tombstoned ID is always a miss until a later `populate` succeeds, so an entry
//! that could not be deleted from an unreachable backend is never served.
//!
//! Every invalidation also bumps a per-post generation. Read-through loads
//! capture it first and only cache what they loaded if no invalidation
//! started in between, so a slow load cannot put a pre-mutation copy back.

mod memory;
mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Post;

pub use memory::MemoryCacheBackend;
pub use redis_backend::RedisCacheBackend;

/// Cache failures. Never surfaced to clients.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("redis error")]
    Redis(#[from] redis::RedisError),

    #[error("cache payload error")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value service with per-entry TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Reachability check for health reporting.
    async fn ping(&self) -> bool;

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Backend used when caching is switched off: nothing is ever stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCacheBackend;

#[async_trait]
impl CacheBackend for NullCacheBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Typed post cache keyed by post ID.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheStoreInner>,
}

struct CacheStoreInner {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    /// Invalidation state per post that has ever been invalidated.
    slots: DashMap<Uuid, Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    /// Bumped at the start of every invalidation.
    generation: u64,
    /// The last invalidation failed; forced misses until a current `populate`.
    tombstoned: bool,
}

impl CacheStore {
    /// Create a cache over `backend`, storing entries for `ttl`.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheStoreInner {
                backend,
                ttl,
                slots: DashMap::new(),
            }),
        }
    }

    /// A cache that never holds anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullCacheBackend), Duration::ZERO)
    }

    /// Cache key for a post.
    pub fn key(id: Uuid) -> String {
        format!("post:{id}")
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Invalidation generation of a post.
    ///
    /// Capture it before loading the post from the store and hand it to
    /// [`CacheStore::populate`].
    pub fn generation(&self, id: Uuid) -> u64 {
        self.inner.slots.get(&id).map_or(0, |slot| slot.generation)
    }

    /// Look up a cached post. `Ok(None)` is a miss.
    pub async fn get(&self, id: Uuid) -> Result<Option<Post>, CacheError> {
        if self.is_tombstoned(id) {
            debug!(post_id = %id, "cache entry tombstoned, forcing miss");
            return Ok(None);
        }

        let Some(raw) = self.inner.backend.get(&Self::key(id)).await? else {
            return Ok(None);
        };

        let post: Post = serde_json::from_str(&raw)?;
        Ok(Some(post))
    }

    /// Store a copy of `post` loaded from the store after `generation` was
    /// read. Returns whether the copy was kept.
    ///
    /// A copy that an invalidation has overtaken is never kept: it is
    /// skipped when the invalidation began before the write, and deleted
    /// again when it began while the write was in flight.
    pub async fn populate(&self, post: &Post, generation: u64) -> Result<bool, CacheError> {
        if self.generation(post.id) != generation {
            debug!(post_id = %post.id, "post invalidated during load, not caching");
            return Ok(false);
        }

        let key = Self::key(post.id);
        let payload = serde_json::to_string(post)?;
        self.inner.backend.set(&key, &payload, self.inner.ttl).await?;

        let current = match self.inner.slots.get_mut(&post.id) {
            Some(mut slot) if slot.generation == generation => {
                slot.tombstoned = false;
                true
            }
            Some(_) => false,
            None => generation == 0,
        };
        if current {
            debug!(post_id = %post.id, ttl_secs = self.inner.ttl.as_secs(), "cache set");
            return Ok(true);
        }

        debug!(post_id = %post.id, "post invalidated during cache write, removing copy");
        if let Err(e) = self.inner.backend.delete(&key).await {
            self.tombstone(post.id);
            warn!(post_id = %post.id, error = %e, "removing overtaken copy failed, id tombstoned");
            return Err(e);
        }
        Ok(false)
    }

    /// Drop any cached copy of a post.
    ///
    /// On failure the ID is tombstoned locally so reads bypass the cache.
    pub async fn invalidate(&self, id: Uuid) -> Result<(), CacheError> {
        self.inner.slots.entry(id).or_default().generation += 1;

        match self.inner.backend.delete(&Self::key(id)).await {
            Ok(()) => {
                if let Some(mut slot) = self.inner.slots.get_mut(&id) {
                    slot.tombstoned = false;
                }
                debug!(post_id = %id, "cache invalidated");
                Ok(())
            }
            Err(e) => {
                self.tombstone(id);
                warn!(post_id = %id, error = %e, "cache invalidation failed, id tombstoned");
                Err(e)
            }
        }
    }

    /// Whether reads of `id` are currently forced to miss.
    pub fn is_tombstoned(&self, id: Uuid) -> bool {
        self.inner.slots.get(&id).is_some_and(|slot| slot.tombstoned)
    }

    pub async fn ping(&self) -> bool {
        self.inner.backend.ping().await
    }

    fn tombstone(&self, id: Uuid) {
        self.inner.slots.entry(id).or_default().tombstoned = true;
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tombstones = self.inner.slots.iter().filter(|slot| slot.tombstoned).count();
        f.debug_struct("CacheStore")
            .field("backend", &self.inner.backend.name())
            .field("ttl", &self.inner.ttl)
            .field("tombstones", &tombstones)
            .finish()
    }
}
