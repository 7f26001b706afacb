//! Request admission helpers: rate limiting, credential extraction and
//! request metrics.

pub mod credential;
pub mod rate_limit;
pub mod request_metrics;

pub use credential::{credential_from_headers, parse_authorization};
pub use rate_limit::{
    Clock, Decision, FixedWindowLimiter, MonotonicClock, RateLimitConfig, RateWindow, get_client_id,
};
pub use request_metrics::track_metrics;
