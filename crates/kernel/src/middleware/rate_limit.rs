//! Fixed-window rate limiting.
//!
//! Time is cut into equal, non-overlapping windows of `window` length. Each
//! client key gets one counter for the current window; when the clock moves
//! into a new window the counter is reset rather than carried over, so bursts
//! straddling a boundary can reach twice the configured rate.
//!
//! State lives in process memory only. A restart forgets every counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Rate limit configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// When false every request is admitted.
    pub enabled: bool,
    /// Requests admitted per client per window.
    pub requests_per_window: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 20,
            window: Duration::from_secs(5),
        }
    }
}

/// Monotonic time source, measured from an arbitrary fixed origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Production clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Counter for one client in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// `floor(now / window)` at the time the counter was (re)started.
    pub window_id: u64,
    pub count: u32,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Over the limit; the client may retry after the window boundary.
    Throttled { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Per-process fixed-window limiter keyed by client.
///
/// Each key owns its own mutex, so concurrent requests from one client are
/// serialized while unrelated clients never wait on each other. The map
/// itself is sharded and only touched briefly to find or create the entry.
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: DashMap<String, Arc<Mutex<RateWindow>>>,
}

impl FixedWindowLimiter {
    /// Create a limiter using the monotonic system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `client_key` and decide whether to admit it.
    pub fn allow(&self, client_key: &str) -> Decision {
        if !self.config.enabled {
            return Decision::Allowed;
        }

        let now = self.clock.now();
        let current = self.window_id(now);

        let slot = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RateWindow {
                    window_id: current,
                    count: 0,
                }))
            })
            .clone();

        let count = {
            let mut window = slot.lock();
            if window.window_id != current {
                window.window_id = current;
                window.count = 0;
            }
            window.count = window.count.saturating_add(1);
            window.count
        };

        if count > self.config.requests_per_window {
            let retry_after = self.until_next_window(now);
            debug!(
                client = client_key,
                count = count,
                limit = self.config.requests_per_window,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            Decision::Throttled { retry_after }
        } else {
            Decision::Allowed
        }
    }

    /// Requests counted for `client_key` in the current window.
    pub fn count(&self, client_key: &str) -> u32 {
        let current = self.window_id(self.clock.now());
        self.windows
            .get(client_key)
            .map(|slot| {
                let window = slot.lock();
                if window.window_id == current {
                    window.count
                } else {
                    0
                }
            })
            .unwrap_or(0)
    }

    /// Drop counters whose window has already ended.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let current = self.window_id(self.clock.now());
        let before = self.windows.len();
        self.windows
            .retain(|_, slot| slot.lock().window_id == current);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed = removed, "swept expired rate limit windows");
        }
        removed
    }

    /// Number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    fn window_id(&self, now: Duration) -> u64 {
        let window = self.config.window.as_nanos().max(1);
        u64::try_from(now.as_nanos() / window).unwrap_or(u64::MAX)
    }

    fn until_next_window(&self, now: Duration) -> Duration {
        let window = self.config.window.as_nanos().max(1);
        let into = now.as_nanos() % window;
        Duration::from_nanos(u64::try_from(window - into).unwrap_or(u64::MAX))
    }
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.windows.len())
            .finish()
    }
}

/// Get the client identifier (IP address) for rate limiting.
pub fn get_client_id(
    addr: Option<std::net::SocketAddr>,
    headers: &axum::http::HeaderMap,
) -> String {
    // Check X-Forwarded-For header first (for proxied requests)
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(ip) = value.split(',').next().map(str::trim)
        && !ip.is_empty()
    {
        return ip.to_string();
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }

    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
