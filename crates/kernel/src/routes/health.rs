//! Health check endpoint.
//!
//! Returns 200 OK while the post store is reachable, 503 Service
//! Unavailable otherwise. An unreachable cache is reported but degrades
//! only latency, so it does not fail the check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    env: String,
    version: &'static str,
    database: bool,
    cache: bool,
}

/// Health check handler. No credential, no rate limit.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, cache) = tokio::join!(state.store_healthy(), state.cache_healthy());

    let (status_code, status) = if database {
        (StatusCode::OK, "available")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            env: state.env().to_string(),
            version: env!("CARGO_PKG_VERSION"),
            database,
            cache,
        }),
    )
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/health", get(health_check))
}
