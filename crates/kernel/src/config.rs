//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::middleware::RateLimitConfig;
use crate::services::auth::BASIC_ISSUER;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 8080).
    pub port: u16,

    /// Deployment name reported by the health endpoint (default: dev).
    pub env: String,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 30).
    pub database_max_connections: u32,

    /// How long an idle pooled connection is kept (default: 15 minutes).
    pub database_idle_timeout: Duration,

    /// Redis connection URL.
    pub redis_url: String,

    /// Post cache settings.
    pub cache: CacheConfig,

    /// Fixed-window rate limiter settings.
    pub rate_limit: RateLimitConfig,

    /// Bearer token and basic credential settings.
    pub auth: AuthConfig,

    /// Outer timeout applied to every request (default: 60 seconds).
    pub request_timeout: Duration,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,
}

/// Which key-value service backs the post cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Shared Redis instance.
    Redis,
    /// In-process moka cache (single instance deployments and development).
    Memory,
}

/// Post cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub ttl: Duration,
}

/// Authentication settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret for signing and verifying bearer tokens.
    pub token_secret: String,
    pub token_issuer: String,
    pub token_audience: String,
    /// Lifetime of issued tokens. Fixed per deployment.
    pub token_ttl: Duration,
    /// Basic scheme user; the scheme is disabled when either half is unset.
    pub basic_user: Option<String>,
    pub basic_pass: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_issuer", &self.token_issuer)
            .field("token_audience", &self.token_audience)
            .field("token_ttl", &self.token_ttl)
            .field("basic_user", &self.basic_user)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Load only the authentication settings from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let token_issuer = get("AUTH_TOKEN_ISSUER", "murmur");
        // Identities from basic credentials carry this issuer.
        if token_issuer == BASIC_ISSUER {
            bail!("AUTH_TOKEN_ISSUER must not be {BASIC_ISSUER:?}");
        }

        Ok(Self {
            token_secret: lookup("AUTH_TOKEN_SECRET")
                .filter(|s| !s.is_empty())
                .context("AUTH_TOKEN_SECRET environment variable is required")?,
            token_audience: lookup("AUTH_TOKEN_AUDIENCE").unwrap_or_else(|| token_issuer.clone()),
            token_issuer,
            token_ttl: get("AUTH_TOKEN_TTL_SECS", "259200")
                .parse()
                .map(Duration::from_secs)
                .context("AUTH_TOKEN_TTL_SECS must be a number of seconds")?,
            basic_user: lookup("AUTH_BASIC_USER").filter(|s| !s.is_empty()),
            basic_pass: lookup("AUTH_BASIC_PASS").filter(|s| !s.is_empty()),
        })
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = get("PORT", "8080")
            .parse()
            .context("PORT must be a valid u16")?;

        let env = get("APP_ENV", "dev");

        let database_url =
            lookup("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = get("DATABASE_MAX_CONNECTIONS", "30")
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let database_idle_timeout = get("DATABASE_IDLE_TIMEOUT_SECS", "900")
            .parse()
            .map(Duration::from_secs)
            .context("DATABASE_IDLE_TIMEOUT_SECS must be a number of seconds")?;

        let redis_url = get("REDIS_URL", "redis://127.0.0.1:6379");

        let cache = CacheConfig {
            enabled: parse_bool(&get("CACHE_ENABLED", "true"))
                .context("CACHE_ENABLED must be a boolean")?,
            backend: match get("CACHE_BACKEND", "redis").to_lowercase().as_str() {
                "redis" => CacheBackendKind::Redis,
                "memory" => CacheBackendKind::Memory,
                other => bail!("CACHE_BACKEND must be \"redis\" or \"memory\", got {other:?}"),
            },
            ttl: get("CACHE_TTL_SECS", "60")
                .parse()
                .map(Duration::from_secs)
                .context("CACHE_TTL_SECS must be a number of seconds")?,
        };

        let rate_limit = RateLimitConfig {
            enabled: parse_bool(&get("RATE_LIMIT_ENABLED", "true"))
                .context("RATE_LIMIT_ENABLED must be a boolean")?,
            requests_per_window: get("RATE_LIMIT_REQUESTS", "20")
                .parse()
                .context("RATE_LIMIT_REQUESTS must be a valid u32")?,
            window: get("RATE_LIMIT_WINDOW_SECS", "5")
                .parse()
                .map(Duration::from_secs)
                .context("RATE_LIMIT_WINDOW_SECS must be a number of seconds")?,
        };

        if rate_limit.enabled && (rate_limit.window.is_zero() || rate_limit.requests_per_window == 0)
        {
            bail!("RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW_SECS must be non-zero");
        }

        let auth = AuthConfig::from_lookup(&lookup)?;

        let request_timeout = get("REQUEST_TIMEOUT_SECS", "60")
            .parse()
            .map(Duration::from_secs)
            .context("REQUEST_TIMEOUT_SECS must be a number of seconds")?;

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            port,
            env,
            database_url,
            database_max_connections,
            database_idle_timeout,
            redis_url,
            cache,
            rate_limit,
            auth,
            request_timeout,
            cors_allowed_origins,
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other:?}"),
    }
}
