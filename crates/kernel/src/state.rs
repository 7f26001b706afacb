//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use tracing::info;

use crate::cache::{CacheStore, MemoryCacheBackend, RedisCacheBackend};
use crate::config::{CacheBackendKind, Config};
use crate::db;
use crate::metrics::Metrics;
use crate::middleware::FixedWindowLimiter;
use crate::pipeline::RequestPipeline;
use crate::services::auth::Authenticator;
use crate::store::{PgPostStore, PostStore};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Deployment name reported by the health endpoint.
    env: String,

    /// Limiter, authenticator, cache and store wired together.
    pipeline: RequestPipeline,
}

impl AppState {
    /// Connect to PostgreSQL and the configured cache backend.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config).await?;
        db::run_migrations(&pool).await?;
        info!("database connected and migrated");

        let store: Arc<dyn PostStore> = Arc::new(PgPostStore::new(pool));
        let cache = build_cache(config)?;
        info!(backend = cache.backend_name(), "post cache ready");

        Ok(Self::from_parts(config, store, cache))
    }

    /// Assemble state around an existing store and cache.
    pub fn from_parts(config: &Config, store: Arc<dyn PostStore>, cache: CacheStore) -> Self {
        let pipeline = RequestPipeline::new(
            Authenticator::new(&config.auth),
            Arc::new(FixedWindowLimiter::new(config.rate_limit.clone())),
            cache,
            store,
            Arc::new(Metrics::new()),
        );
        Self::from_pipeline(config.env.clone(), pipeline)
    }

    pub fn from_pipeline(env: impl Into<String>, pipeline: RequestPipeline) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                env: env.into(),
                pipeline,
            }),
        }
    }

    pub fn env(&self) -> &str {
        &self.inner.env
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.inner.pipeline
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.inner.pipeline.metrics()
    }

    pub async fn store_healthy(&self) -> bool {
        self.inner.pipeline.store().ping().await
    }

    pub async fn cache_healthy(&self) -> bool {
        self.inner.pipeline.cache().ping().await
    }
}

/// Build the post cache selected by configuration.
pub fn build_cache(config: &Config) -> Result<CacheStore> {
    if !config.cache.enabled {
        return Ok(CacheStore::disabled());
    }

    let cache = match config.cache.backend {
        CacheBackendKind::Redis => {
            let client =
                RedisClient::open(config.redis_url.as_str()).context("failed to create Redis client")?;
            CacheStore::new(Arc::new(RedisCacheBackend::new(client)), config.cache.ttl)
        }
        CacheBackendKind::Memory => {
            CacheStore::new(Arc::new(MemoryCacheBackend::new()), config.cache.ttl)
        }
    };
    Ok(cache)
}
