#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! [`TestApp`] assembles the REAL router and pipeline over the in-memory
//! post store, the moka cache backend and a manual clock, so tests need no
//! PostgreSQL or Redis and can move time deterministically.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use murmur_kernel::cache::{CacheBackend, CacheStore, MemoryCacheBackend};
use murmur_kernel::config::Config;
use murmur_kernel::metrics::Metrics;
use murmur_kernel::middleware::FixedWindowLimiter;
use murmur_kernel::pipeline::RequestPipeline;
use murmur_kernel::routes;
use murmur_kernel::services::auth::Authenticator;
use murmur_kernel::state::AppState;
use murmur_kernel::models::Post;
use murmur_kernel::store::{MemoryPostStore, PostStore, StoreError};
use murmur_test_utils::ManualClock;

pub const TOKEN_SECRET: &str = "integration-test-secret-0123456789";
pub const ISSUER: &str = "murmur";
pub const BASIC_USER: &str = "admin";
pub const BASIC_PASS: &str = "admin-pass";

/// Configuration as the server would load it, minus external services.
pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: Vec<(String, String)> = [
        ("DATABASE_URL", "postgres://unused/murmur"),
        ("APP_ENV", "test"),
        ("AUTH_TOKEN_SECRET", TOKEN_SECRET),
        ("AUTH_TOKEN_ISSUER", ISSUER),
        ("AUTH_BASIC_USER", BASIC_USER),
        ("AUTH_BASIC_PASS", BASIC_PASS),
        ("CACHE_BACKEND", "memory"),
        ("RATE_LIMIT_REQUESTS", "1000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    // Later entries win, so overrides in `extra` take effect.
    Config::from_lookup(|key| {
        vars.iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .expect("test config")
}

/// Test application wrapper using the REAL kernel routes and pipeline.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<MemoryPostStore>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    /// App with a generous rate limit and the moka cache.
    pub fn new() -> Self {
        Self::build(&test_config(&[]), Arc::new(MemoryCacheBackend::new()))
    }

    /// App with a specific limit and window.
    pub fn with_rate_limit(requests: u32, window_secs: u64) -> Self {
        let requests = requests.to_string();
        let window = window_secs.to_string();
        let config = test_config(&[
            ("RATE_LIMIT_REQUESTS", requests.as_str()),
            ("RATE_LIMIT_WINDOW_SECS", window.as_str()),
        ]);
        Self::build(&config, Arc::new(MemoryCacheBackend::new()))
    }

    /// App over a caller-supplied cache backend.
    pub fn with_cache_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self::build(&test_config(&[]), backend)
    }

    /// App with a one second request timeout whose store takes `delay` to
    /// answer reads.
    pub fn with_slow_reads(delay: Duration) -> Self {
        let config = test_config(&[("REQUEST_TIMEOUT_SECS", "1")]);
        Self::assemble(&config, Arc::new(MemoryCacheBackend::new()), Some(delay))
    }

    fn build(config: &Config, backend: Arc<dyn CacheBackend>) -> Self {
        Self::assemble(config, backend, None)
    }

    fn assemble(
        config: &Config,
        backend: Arc<dyn CacheBackend>,
        read_delay: Option<Duration>,
    ) -> Self {
        let store = Arc::new(MemoryPostStore::new());
        let clock = Arc::new(ManualClock::new());
        let limiter = FixedWindowLimiter::with_clock(config.rate_limit.clone(), clock.clone());

        let post_store: Arc<dyn PostStore> = match read_delay {
            Some(delay) => Arc::new(SlowReads {
                inner: store.clone(),
                delay,
            }),
            None => store.clone(),
        };

        let pipeline = RequestPipeline::new(
            Authenticator::new(&config.auth),
            Arc::new(limiter),
            CacheStore::new(backend, config.cache.ttl),
            post_store,
            Arc::new(Metrics::new()),
        );
        let state = AppState::from_pipeline(config.env.clone(), pipeline);
        let router = routes::app(state.clone(), config);

        Self {
            router,
            state,
            store,
            clock,
        }
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        self.state.pipeline()
    }

    /// A valid bearer token for `subject`.
    pub fn token_for(&self, subject: &str) -> String {
        self.pipeline()
            .authenticator()
            .issue_token(subject)
            .expect("issue token")
            .token
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Advance the limiter clock.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Store wrapper that stalls before every read.
struct SlowReads {
    inner: Arc<MemoryPostStore>,
    delay: Duration,
}

#[async_trait]
impl PostStore for SlowReads {
    async fn create(&self, post: &Post) -> Result<Uuid, StoreError> {
        self.inner.create(post).await
    }

    async fn read(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read(id).await
    }

    async fn update(&self, post: &Post) -> Result<Post, StoreError> {
        self.inner.update(post).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Collect a response body as text.
pub async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("UTF-8 body")
}
