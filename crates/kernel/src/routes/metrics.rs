//! Prometheus metrics endpoint.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::error::{AppError, AppResult};
use crate::routes::Caller;
use crate::services::auth::Credential;
use crate::state::AppState;

/// Prometheus text exposition content type.
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/debug/metrics", get(metrics))
}

/// Metrics in Prometheus text format, behind basic credentials.
async fn metrics(State(state): State<AppState>, caller: Caller) -> AppResult<Response> {
    let is_basic = matches!(caller.credential, Ok(Credential::Basic { .. }));
    state.pipeline().authenticate(caller.credential)?;
    if !is_basic {
        return Err(AppError::Forbidden);
    }

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        state.metrics().encode(),
    )
        .into_response())
}
