//! Request pipeline for post operations.
//!
//! Every request passes the same stages in order: rate limit admission,
//! credential verification, input validation, resource resolution through
//! the cache then the store, ownership check for mutations, and finally the
//! storage operation. Mutations invalidate the cached copy before returning.
//! The write and its invalidation run together in a detached task, so a
//! request that is dropped part way still invalidates.

use std::sync::Arc;

use axum::body::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::{Decision, FixedWindowLimiter};
use crate::models::{NewPost, Post, PostPatch, parse_post_id};
use crate::services::auth::{AuthError, Authenticator, Credential, Identity};
use crate::store::{PostStore, StoreError};

/// A post request as received, before any verification.
#[derive(Debug)]
pub struct PostRequest {
    /// Rate limiting key for the caller.
    pub client_key: String,

    /// Credential from the request, or why none could be read.
    pub credential: Result<Credential, AuthError>,

    pub operation: Operation,
}

/// The operation a request asks for, with its raw inputs.
#[derive(Debug, Clone)]
pub enum Operation {
    Create { body: Bytes },
    Read { id: String },
    Update { id: String, body: Bytes },
    Delete { id: String },
}

/// Successful pipeline results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(Post),
    Found(Post),
    Updated(Post),
    Deleted(Uuid),
}

/// Orchestrates limiter, authenticator, cache and store for post requests.
#[derive(Clone)]
pub struct RequestPipeline {
    authenticator: Authenticator,
    limiter: Arc<FixedWindowLimiter>,
    cache: CacheStore,
    store: Arc<dyn PostStore>,
    metrics: Arc<Metrics>,
}

impl RequestPipeline {
    pub fn new(
        authenticator: Authenticator,
        limiter: Arc<FixedWindowLimiter>,
        cache: CacheStore,
        store: Arc<dyn PostStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            authenticator,
            limiter,
            cache,
            store,
            metrics,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn PostStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run a request through every stage.
    pub async fn handle(&self, request: PostRequest) -> AppResult<Outcome> {
        self.admit(&request.client_key)?;
        let identity = self.authenticate(request.credential)?;

        match request.operation {
            Operation::Create { body } => {
                let input: NewPost = parse_body(&body)?;
                input.validate().map_err(AppError::Validation)?;
                self.create(&identity, input).await.map(Outcome::Created)
            }
            Operation::Read { id } => {
                let id = parse_post_id(&id).map_err(AppError::Validation)?;
                self.read(id).await.map(Outcome::Found)
            }
            Operation::Update { id, body } => {
                let id = parse_post_id(&id).map_err(AppError::Validation)?;
                let patch: PostPatch = parse_body(&body)?;
                patch.validate().map_err(AppError::Validation)?;
                self.update(&identity, id, patch).await.map(Outcome::Updated)
            }
            Operation::Delete { id } => {
                let id = parse_post_id(&id).map_err(AppError::Validation)?;
                self.delete(&identity, id).await.map(|()| Outcome::Deleted(id))
            }
        }
    }

    /// Rate limit admission. Counts the request even when it is rejected.
    pub fn admit(&self, client_key: &str) -> AppResult<()> {
        match self.limiter.allow(client_key) {
            Decision::Allowed => Ok(()),
            Decision::Throttled { retry_after } => {
                self.metrics.record_rate_limit();
                Err(AppError::Throttled { retry_after })
            }
        }
    }

    /// Verify a credential, counting failures by reason.
    pub fn authenticate(&self, credential: Result<Credential, AuthError>) -> AppResult<Identity> {
        credential
            .and_then(|c| self.authenticator.authenticate(&c))
            .map_err(|e| {
                debug!(reason = e.reason(), "authentication failed");
                self.metrics.record_auth_failure(e.reason());
                AppError::Unauthenticated(e)
            })
    }

    /// Insert a validated post owned by `identity`.
    pub async fn create(&self, identity: &Identity, input: NewPost) -> AppResult<Post> {
        let post = Post::new(&identity.subject, input);
        self.store.create(&post).await.map_err(store_failure)?;
        debug!(post_id = %post.id, owner = %post.owner_id, "post created");
        Ok(post)
    }

    /// Any authenticated caller may read any post.
    pub async fn read(&self, id: Uuid) -> AppResult<Post> {
        self.resolve(id).await
    }

    pub async fn update(&self, identity: &Identity, id: Uuid, patch: PostPatch) -> AppResult<Post> {
        let current = self.resolve(id).await?;
        authorize(identity, &current)?;

        let next = current.patched(patch);
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        let metrics = Arc::clone(&self.metrics);
        let updated = run_mutation(id, async move {
            let result = store.update(&next).await;
            // Conflict or NotFound means the resolved copy was stale; drop it too.
            if matches!(
                result,
                Ok(_) | Err(StoreError::Conflict(_) | StoreError::NotFound(_))
            ) {
                invalidate(&cache, &metrics, id).await;
            }
            result
        })
        .await?;

        debug!(post_id = %id, version = updated.version, "post updated");
        Ok(updated)
    }

    pub async fn delete(&self, identity: &Identity, id: Uuid) -> AppResult<()> {
        let current = self.resolve(id).await?;
        authorize(identity, &current)?;

        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        let metrics = Arc::clone(&self.metrics);
        let removed = run_mutation(id, async move {
            let removed = store.delete(id).await?;
            invalidate(&cache, &metrics, id).await;
            Ok::<_, StoreError>(removed)
        })
        .await?;

        if !removed {
            // Deleted by a concurrent request between resolve and delete.
            return Err(AppError::NotFound);
        }
        debug!(post_id = %id, "post deleted");
        Ok(())
    }

    /// Load a post from the cache, falling back to the store and
    /// repopulating the cache on a miss.
    async fn resolve(&self, id: Uuid) -> AppResult<Post> {
        match self.cache.get(id).await {
            Ok(Some(post)) => {
                self.metrics.record_cache_hit();
                return Ok(post);
            }
            Ok(None) => self.metrics.record_cache_miss(),
            Err(e) => {
                warn!(post_id = %id, error = %e, "cache read failed, using store");
                self.metrics.record_cache_miss();
            }
        }

        let generation = self.cache.generation(id);
        let post = self
            .store
            .read(id)
            .await
            .map_err(store_failure)?
            .ok_or(AppError::NotFound)?;

        if let Err(e) = self.cache.populate(&post, generation).await {
            warn!(post_id = %id, error = %e, "cache populate failed");
        }
        Ok(post)
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("limiter", &self.limiter)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Run a store write and the invalidation that follows it as one task.
///
/// The task is awaited but not owned by the request, so a request dropped
/// mid-write (for example by the timeout layer) still invalidates.
async fn run_mutation<T, F>(id: Uuid, mutation: F) -> AppResult<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    match tokio::spawn(mutation).await {
        Ok(result) => result.map_err(store_failure),
        Err(e) => {
            error!(post_id = %id, error = %e, "post mutation task failed");
            Err(AppError::Internal(
                anyhow::Error::new(e).context("post mutation task failed"),
            ))
        }
    }
}

/// Remove the cached copy of a post. Failures are recorded but never fail
/// the caller.
async fn invalidate(cache: &CacheStore, metrics: &Metrics, id: Uuid) {
    if cache.invalidate(id).await.is_err() {
        metrics.record_invalidation_failure();
    }
}

fn authorize(identity: &Identity, post: &Post) -> AppResult<()> {
    if post.is_owned_by(&identity.subject) {
        Ok(())
    } else {
        debug!(post_id = %post.id, subject = %identity.subject, "not the owner");
        Err(AppError::Forbidden)
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("invalid body: {e}")))
}

fn store_failure(e: StoreError) -> AppError {
    if !matches!(e, StoreError::Conflict(_) | StoreError::NotFound(_)) {
        error!(error = %e, "post store failure");
    }
    AppError::from(e)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::config::AuthConfig;
    use crate::middleware::RateLimitConfig;
    use crate::store::MemoryPostStore;

    fn pipeline() -> (RequestPipeline, Arc<MemoryPostStore>) {
        let store = Arc::new(MemoryPostStore::new());
        (pipeline_over(store.clone()), store)
    }

    fn pipeline_over(store: Arc<dyn PostStore>) -> RequestPipeline {
        let auth = Authenticator::new(&AuthConfig {
            token_secret: "unit-test-secret".to_string(),
            token_issuer: "murmur".to_string(),
            token_audience: "murmur".to_string(),
            token_ttl: Duration::from_secs(600),
            basic_user: None,
            basic_pass: None,
        });
        RequestPipeline::new(
            auth,
            Arc::new(FixedWindowLimiter::new(RateLimitConfig {
                enabled: false,
                ..Default::default()
            })),
            CacheStore::new(Arc::new(MemoryCacheBackend::new()), Duration::from_secs(60)),
            store,
            Arc::new(Metrics::new()),
        )
    }

    fn identity(subject: &str) -> Identity {
        Identity {
            subject: subject.to_string(),
            issuer: "murmur".to_string(),
            expires_at: None,
        }
    }

    fn new_post() -> NewPost {
        NewPost {
            title: "a".to_string(),
            content: "body".to_string(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn missing_post_is_not_found() {
        let (pipeline, _) = pipeline();
        assert!(matches!(
            pipeline.read(Uuid::now_v7()).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn stale_update_conflicts_and_drops_cached_copy() {
        let (pipeline, store) = pipeline();
        let owner = identity("alice");
        let post = pipeline.create(&owner, new_post()).await.unwrap();

        // Cache the version-0 copy, then move the stored record on.
        pipeline.read(post.id).await.unwrap();
        let mut behind_the_cache = post.clone();
        behind_the_cache.title = "elsewhere".to_string();
        store.update(&behind_the_cache).await.unwrap();

        assert!(matches!(
            pipeline.update(&owner, post.id, retitle("mine")).await,
            Err(AppError::Conflict)
        ));

        // Next read goes to the store and sees the current record.
        assert_eq!(pipeline.read(post.id).await.unwrap().title, "elsewhere");
    }

    #[tokio::test]
    async fn cache_failure_falls_back_to_store() {
        let (pipeline, store) = pipeline();
        let post = pipeline.create(&identity("alice"), new_post()).await.unwrap();

        // A corrupt cached payload is treated as a miss.
        let backend = MemoryCacheBackend::new();
        crate::cache::CacheBackend::set(
            &backend,
            &CacheStore::key(post.id),
            "{",
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        let cache = CacheStore::new(Arc::new(backend), Duration::from_secs(60));
        let degraded = RequestPipeline::new(
            pipeline.authenticator().clone(),
            pipeline.limiter().clone(),
            cache,
            store.clone(),
            pipeline.metrics().clone(),
        );

        assert_eq!(degraded.read(post.id).await.unwrap(), post);
        assert_eq!(store.reads(), 1);
    }

    fn retitle(title: &str) -> PostPatch {
        PostPatch {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    /// Memory store that can stall after reading or after writing.
    #[derive(Default)]
    struct Sluggish {
        inner: MemoryPostStore,
        /// Applied to the next read only.
        read_stall_ms: AtomicU64,
        write_stall_ms: AtomicU64,
    }

    #[async_trait]
    impl PostStore for Sluggish {
        async fn create(&self, post: &Post) -> Result<Uuid, StoreError> {
            self.inner.create(post).await
        }

        async fn read(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
            let post = self.inner.read(id).await?;
            let stall = self.read_stall_ms.swap(0, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(stall)).await;
            Ok(post)
        }

        async fn update(&self, post: &Post) -> Result<Post, StoreError> {
            let result = self.inner.update(post).await;
            let stall = self.write_stall_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(stall)).await;
            result
        }

        async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn update_dropped_after_write_still_invalidates() {
        let store = Arc::new(Sluggish::default());
        let pipeline = pipeline_over(store.clone());
        let owner = identity("alice");
        let post = pipeline.create(&owner, new_post()).await.unwrap();
        pipeline.read(post.id).await.unwrap();

        store.write_stall_ms.store(300, Ordering::SeqCst);
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.update(&owner, post.id, retitle("b")),
        )
        .await;
        assert!(attempt.is_err(), "update should outlive the timeout");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.inner.read(post.id).await.unwrap().unwrap().title, "b");
        assert_eq!(pipeline.read(post.id).await.unwrap().title, "b");
    }

    #[tokio::test]
    async fn slow_read_cannot_recache_pre_update_copy() {
        let store = Arc::new(Sluggish::default());
        let pipeline = pipeline_over(store.clone());
        let owner = identity("alice");
        let post = pipeline.create(&owner, new_post()).await.unwrap();

        store.read_stall_ms.store(300, Ordering::SeqCst);
        let reader = {
            let pipeline = pipeline.clone();
            let id = post.id;
            tokio::spawn(async move { pipeline.read(id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let updated = pipeline.update(&owner, post.id, retitle("b")).await.unwrap();
        assert_eq!(updated.title, "b");

        // The reader loaded the old record before the update landed.
        assert_eq!(reader.await.unwrap().unwrap().title, "a");
        assert_eq!(pipeline.read(post.id).await.unwrap().title, "b");
    }

    #[tokio::test]
    async fn update_of_post_deleted_behind_the_cache_is_not_found() {
        let (pipeline, store) = pipeline();
        let owner = identity("alice");
        let post = pipeline.create(&owner, new_post()).await.unwrap();
        pipeline.read(post.id).await.unwrap();
        store.delete(post.id).await.unwrap();

        assert!(matches!(
            pipeline.update(&owner, post.id, retitle("b")).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(pipeline.read(post.id).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn store_outage_is_internal_error() {
        let (pipeline, store) = pipeline();
        store.set_available(false);
        let err = pipeline.read(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
