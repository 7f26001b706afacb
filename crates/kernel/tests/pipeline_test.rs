#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Request pipeline tests.
//!
//! Drive `RequestPipeline::handle` directly with in-memory collaborators
//! and a manual clock.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use uuid::Uuid;

use common::{ISSUER, TOKEN_SECRET, TestApp};
use murmur_kernel::cache::{CacheBackend, CacheError, MemoryCacheBackend};
use murmur_kernel::error::AppError;
use murmur_kernel::pipeline::{Operation, Outcome, PostRequest};
use murmur_kernel::services::auth::{AuthError, Credential, TokenClaims};
use murmur_kernel::store::PostStore;
use murmur_test_utils::{test_post, title_patch};

fn request(client: &str, token: &str, operation: Operation) -> PostRequest {
    PostRequest {
        client_key: client.to_string(),
        credential: Ok(Credential::Token(token.to_string())),
        operation,
    }
}

fn create_op(title: &str) -> Operation {
    Operation::Create {
        body: Bytes::from(test_post(title).body()),
    }
}

fn read_op(id: Uuid) -> Operation {
    Operation::Read { id: id.to_string() }
}

fn update_op(id: Uuid, title: &str) -> Operation {
    Operation::Update {
        id: id.to_string(),
        body: Bytes::from(title_patch(title)),
    }
}

async fn create(app: &TestApp, token: &str, title: &str) -> Uuid {
    match app
        .pipeline()
        .handle(request("creator", token, create_op(title)))
        .await
        .unwrap()
    {
        Outcome::Created(post) => post.id,
        other => panic!("expected Created, got {other:?}"),
    }
}

fn expired_token(subject: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
        iss: ISSUER.to_string(),
        sub: subject.to_string(),
        aud: ISSUER.to_string(),
        iat: now - 7200,
        nbf: now - 7200,
        exp: now - 3600,
        jti: Uuid::now_v7().to_string(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TOKEN_SECRET.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn third_request_in_window_is_throttled_with_retry_hint() {
    let app = TestApp::with_rate_limit(2, 5);
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;

    let mut results = Vec::new();
    for _ in 0..3 {
        results.push(app.pipeline().handle(request("client-x", &token, read_op(id))).await);
        app.advance(Duration::from_millis(500));
    }

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    match &results[2] {
        Err(AppError::Throttled { retry_after }) => {
            assert_eq!(*retry_after, Duration::from_secs(4));
        }
        other => panic!("expected Throttled, got {other:?}"),
    }
}

#[tokio::test]
async fn limit_plus_one_yields_exactly_one_throttle_and_spares_other_clients() {
    let limit = 5;
    let app = TestApp::with_rate_limit(limit, 60);
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;

    let mut throttled = 0;
    for _ in 0..=limit {
        if let Err(AppError::Throttled { .. }) =
            app.pipeline().handle(request("busy", &token, read_op(id))).await
        {
            throttled += 1;
        }
    }
    assert_eq!(throttled, 1);

    let other = app.pipeline().handle(request("quiet", &token, read_op(id))).await;
    assert!(other.is_ok());
}

#[tokio::test]
async fn counter_resets_at_window_boundary() {
    let app = TestApp::with_rate_limit(1, 5);
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;

    app.advance(Duration::from_millis(4_900));
    assert!(app.pipeline().handle(request("edge", &token, read_op(id))).await.is_ok());
    assert!(matches!(
        app.pipeline().handle(request("edge", &token, read_op(id))).await,
        Err(AppError::Throttled { .. })
    ));

    // Exactly on the boundary the window is new and the count restarts.
    app.advance(Duration::from_millis(100));
    assert!(app.pipeline().handle(request("edge", &token, read_op(id))).await.is_ok());
    assert_eq!(app.pipeline().limiter().count("edge"), 1);
}

#[tokio::test]
async fn second_read_is_served_from_cache_and_update_is_visible() {
    let app = TestApp::new();
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;

    for _ in 0..2 {
        let outcome = app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();
        assert!(matches!(outcome, Outcome::Found(ref p) if p.title == "a"));
    }
    assert_eq!(app.store.reads(), 1);

    let updated = app
        .pipeline()
        .handle(request("c", &token, update_op(id, "b")))
        .await
        .unwrap();
    assert!(matches!(updated, Outcome::Updated(ref p) if p.title == "b" && p.version == 1));

    let outcome = app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();
    assert!(matches!(outcome, Outcome::Found(ref p) if p.title == "b"));
}

#[tokio::test]
async fn deleted_post_is_not_served_from_cache() {
    let app = TestApp::new();
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;
    app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();

    let deleted = app
        .pipeline()
        .handle(request("c", &token, Operation::Delete { id: id.to_string() }))
        .await
        .unwrap();
    assert_eq!(deleted, Outcome::Deleted(id));

    assert!(matches!(
        app.pipeline().handle(request("c", &token, read_op(id))).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn expired_token_is_unauthenticated_after_counting_the_request() {
    let app = TestApp::with_rate_limit(10, 5);
    let token = expired_token("alice");

    let result = app
        .pipeline()
        .handle(request("late", &token, read_op(Uuid::now_v7())))
        .await;

    assert!(matches!(
        result,
        Err(AppError::Unauthenticated(AuthError::ExpiredToken))
    ));
    assert_eq!(app.pipeline().limiter().count("late"), 1);
}

#[tokio::test]
async fn throttle_is_checked_before_credentials() {
    let app = TestApp::with_rate_limit(1, 5);
    let missing = || PostRequest {
        client_key: "anon".to_string(),
        credential: Err(AuthError::MissingCredential),
        operation: read_op(Uuid::now_v7()),
    };

    assert!(matches!(
        app.pipeline().handle(missing()).await,
        Err(AppError::Unauthenticated(AuthError::MissingCredential))
    ));
    assert!(matches!(
        app.pipeline().handle(missing()).await,
        Err(AppError::Throttled { .. })
    ));
}

#[tokio::test]
async fn non_owner_is_forbidden_with_cold_and_warm_cache() {
    let app = TestApp::new();
    let alice = app.token_for("alice");
    let mallory = app.token_for("mallory");
    let id = create(&app, &alice, "a").await;

    // Cold cache.
    assert!(matches!(
        app.pipeline().handle(request("m", &mallory, update_op(id, "pwned"))).await,
        Err(AppError::Forbidden)
    ));

    // Warm cache.
    app.pipeline().handle(request("m", &mallory, read_op(id))).await.unwrap();
    assert!(matches!(
        app.pipeline()
            .handle(request("m", &mallory, Operation::Delete { id: id.to_string() }))
            .await,
        Err(AppError::Forbidden)
    ));

    let stored = app.store.read(id).await.unwrap().unwrap();
    assert_eq!(stored.title, "a");
}

#[tokio::test]
async fn invalid_input_is_rejected_before_storage() {
    let app = TestApp::new();
    let token = app.token_for("alice");

    let too_long = "x".repeat(101);
    let result = app
        .pipeline()
        .handle(request("v", &token, create_op(&too_long)))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let result = app
        .pipeline()
        .handle(request("v", &token, read_op_raw("not-a-uuid")))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    assert!(app.store.is_empty());
    assert_eq!(app.store.reads(), 0);
}

fn read_op_raw(id: &str) -> Operation {
    Operation::Read { id: id.to_string() }
}

/// Memory backend whose deletes can be switched to fail.
struct UnreliableDeletes {
    inner: MemoryCacheBackend,
    failing: AtomicBool,
}

#[async_trait]
impl CacheBackend for UnreliableDeletes {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("connection reset".to_string()));
        }
        self.inner.delete(key).await
    }

    async fn ping(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "unreliable"
    }
}

#[tokio::test]
async fn failed_invalidation_keeps_mutation_and_never_serves_stale_copy() {
    let backend = Arc::new(UnreliableDeletes {
        inner: MemoryCacheBackend::new(),
        failing: AtomicBool::new(false),
    });
    let app = TestApp::with_cache_backend(backend.clone());
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;

    // Warm the cache with "a", then break deletes.
    app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();
    backend.failing.store(true, Ordering::SeqCst);

    let updated = app
        .pipeline()
        .handle(request("c", &token, update_op(id, "b")))
        .await
        .unwrap();
    assert!(matches!(updated, Outcome::Updated(ref p) if p.title == "b"));
    assert!(app.pipeline().cache().is_tombstoned(id));
    assert_eq!(app.pipeline().metrics().cache_invalidation_failures.get(), 1);

    let reads_before = app.store.reads();
    let outcome = app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();
    assert!(matches!(outcome, Outcome::Found(ref p) if p.title == "b"));
    assert_eq!(app.store.reads(), reads_before + 1);
}

#[tokio::test]
async fn concurrent_updates_from_same_version_conflict() {
    let app = TestApp::new();
    let token = app.token_for("alice");
    let id = create(&app, &token, "a").await;

    // Cache version 0, then land an update that bypasses this cache.
    app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();
    let mut other_writer = app.store.read(id).await.unwrap().unwrap();
    other_writer.title = "other".to_string();
    app.store.update(&other_writer).await.unwrap();

    assert!(matches!(
        app.pipeline().handle(request("c", &token, update_op(id, "mine"))).await,
        Err(AppError::Conflict)
    ));

    // The conflicting attempt dropped the stale copy.
    let outcome = app.pipeline().handle(request("c", &token, read_op(id))).await.unwrap();
    assert!(matches!(outcome, Outcome::Found(ref p) if p.title == "other"));
}
