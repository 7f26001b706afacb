//! Bearer token issuance.
//!
//! Only basic credentials may mint tokens; a bearer token cannot be used to
//! obtain another.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::routes::Caller;
use crate::services::auth::{Credential, IssuedToken};
use crate::state::AppState;

/// Longest accepted token subject.
const MAX_SUBJECT_LEN: usize = 128;

/// Token request body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRequest {
    pub subject: String,
}

/// Create the authentication router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/authentication/token", post(issue_token))
}

async fn issue_token(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> AppResult<Json<IssuedToken>> {
    let pipeline = state.pipeline();
    pipeline.admit(&caller.client_key)?;
    let is_basic = matches!(caller.credential, Ok(Credential::Basic { .. }));
    let identity = pipeline.authenticate(caller.credential)?;
    if !is_basic {
        return Err(AppError::Forbidden);
    }

    let request: TokenRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid body: {e}")))?;
    let subject = request.subject.trim();
    if subject.is_empty() {
        return Err(AppError::Validation("subject is required".to_string()));
    }
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(AppError::Validation(format!(
            "subject must be at most {MAX_SUBJECT_LEN} characters"
        )));
    }

    let issued = pipeline.authenticator().issue_token(subject)?;
    info!(subject = %subject, issued_by = %identity.subject, "bearer token issued");
    Ok(Json(issued))
}
