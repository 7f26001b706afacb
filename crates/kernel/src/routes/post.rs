//! Post CRUD routes.
//!
//! Handlers only translate HTTP into a [`PostRequest`]; every decision is
//! made by the request pipeline.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::AppResult;
use crate::pipeline::{Operation, Outcome, PostRequest};
use crate::routes::Caller;
use crate::state::AppState;

/// Create the post router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/posts", post(create_post))
        .route(
            "/v1/posts/{id}",
            get(read_post).patch(update_post).delete(delete_post),
        )
}

async fn create_post(State(state): State<AppState>, caller: Caller, body: Bytes) -> AppResult<Response> {
    run(&state, caller, Operation::Create { body }).await
}

async fn read_post(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> AppResult<Response> {
    run(&state, caller, Operation::Read { id }).await
}

async fn update_post(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Response> {
    run(&state, caller, Operation::Update { id, body }).await
}

async fn delete_post(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> AppResult<Response> {
    run(&state, caller, Operation::Delete { id }).await
}

async fn run(state: &AppState, caller: Caller, operation: Operation) -> AppResult<Response> {
    let request = PostRequest {
        client_key: caller.client_key,
        credential: caller.credential,
        operation,
    };

    let response = match state.pipeline().handle(request).await? {
        Outcome::Created(post) => (StatusCode::CREATED, Json(post)).into_response(),
        Outcome::Found(post) | Outcome::Updated(post) => Json(post).into_response(),
        Outcome::Deleted(_) => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}
