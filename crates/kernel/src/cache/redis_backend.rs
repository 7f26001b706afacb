//! Redis cache backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client as RedisClient;

use super::{CacheBackend, CacheError};

/// Cache backend on a shared Redis instance.
///
/// Opens a multiplexed connection per call; the client reconnects on its
/// own after the server comes back.
#[derive(Clone)]
pub struct RedisCacheBackend {
    redis: RedisClient,
}

impl RedisCacheBackend {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        // Redis rejects a zero expiry; round sub-second TTLs up.
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.redis.get_multiplexed_async_connection().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_reports_errors_not_panics() {
        // Nothing listens on port 1; connection attempts fail fast.
        let client = RedisClient::open("redis://127.0.0.1:1").unwrap();
        let backend = RedisCacheBackend::new(client);

        assert!(!backend.ping().await);
        assert!(backend.get("post:x").await.is_err());
        assert!(backend.delete("post:x").await.is_err());
        assert_eq!(backend.name(), "redis");
    }
}
