// SPDX-License-Identifier: MIT

//! Registry-mode verifier tests against a stub JWK endpoint.
//!
//! These cover the paths the static-key tests cannot: the real JWK fetch,
//! the `Cache-Control`-driven cache, the forced refresh on an unknown
//! `kid` (key rotation), and the transient-failure mapping when the
//! registry is unreachable.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use gcp_iap_auth::config::{Config, DEFAULT_ISSUER};
use gcp_iap_auth::routes::create_router;
use gcp_iap_auth::services::{AudienceValidator, IapVerifier};
use gcp_iap_auth::AppState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

mod common;

use common::{mint_assertion, EC_JWK_X, EC_JWK_Y, TEST_KID};

const TEST_AUDIENCE: &str = "/projects/123456/apps/my-proj";

/// Mutable key set so tests can rotate keys between requests, plus a hit
/// counter to observe whether a request reached the registry or was served
/// from the verifier's cache.
struct RegistryState {
    kids: RwLock<Vec<String>>,
    hits: AtomicUsize,
}

async fn serve_jwks(State(state): State<Arc<RegistryState>>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let keys: Vec<serde_json::Value> = state
        .kids
        .read()
        .unwrap()
        .iter()
        .map(|kid| {
            serde_json::json!({
                "kid": kid,
                "kty": "EC",
                "crv": "P-256",
                "use": "sig",
                "alg": "ES256",
                "x": EC_JWK_X,
                "y": EC_JWK_Y,
            })
        })
        .collect();

    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(serde_json::json!({ "keys": keys })),
    )
}

/// Spawn a stub registry serving the static test key under the given kids.
async fn spawn_registry(kids: &[&str]) -> (SocketAddr, Arc<RegistryState>) {
    let state = Arc::new(RegistryState {
        kids: RwLock::new(kids.iter().map(|kid| kid.to_string()).collect()),
        hits: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/", get(serve_jwks))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Create a test app whose verifier fetches keys from `registry_url`.
fn create_registry_app(registry_url: String) -> Router {
    let mut config = Config::test_default();
    config.registry_url = registry_url;

    let audience_validator = AudienceValidator::new(TEST_AUDIENCE).unwrap();
    let verifier = IapVerifier::new(&config, Some(audience_validator))
        .expect("Failed to build registry-mode verifier");

    let state = Arc::new(AppState { config, verifier });
    create_router(state)
}

fn identity_request(token: &str) -> Request<Body> {
    Request::builder()
        .uri("/identity")
        .header("x-goog-iap-jwt-assertion", token)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, token: &str) -> StatusCode {
    use tower::ServiceExt;

    app.clone()
        .oneshot(identity_request(token))
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_valid_assertion_verifies_after_registry_fetch() {
    let (addr, registry) = spawn_registry(&[TEST_KID]).await;
    let app = create_registry_app(format!("http://{addr}"));

    let token = mint_assertion(TEST_KID, DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);

    assert_eq!(send(&app, &token).await, StatusCode::OK);
    assert_eq!(registry.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_key_is_reused_within_ttl() {
    let (addr, registry) = spawn_registry(&[TEST_KID]).await;
    let app = create_registry_app(format!("http://{addr}"));

    let token = mint_assertion(TEST_KID, DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);

    assert_eq!(send(&app, &token).await, StatusCode::OK);
    assert_eq!(send(&app, &token).await, StatusCode::OK);

    // max-age=3600: the second request must be served from the cache.
    assert_eq!(registry.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rotated_kid_found_via_forced_refresh() {
    let (addr, registry) = spawn_registry(&[TEST_KID]).await;
    let app = create_registry_app(format!("http://{addr}"));

    let token = mint_assertion(TEST_KID, DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);
    assert_eq!(send(&app, &token).await, StatusCode::OK);
    assert_eq!(registry.hits.load(Ordering::SeqCst), 1);

    // Rotate: a new kid appears at the registry while the cached entry is
    // still fresh. Only a forced refresh can pick it up.
    registry
        .kids
        .write()
        .unwrap()
        .push("rotated-key-2".to_string());

    let rotated = mint_assertion("rotated-key-2", DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);
    assert_eq!(send(&app, &rotated).await, StatusCode::OK);
    assert_eq!(registry.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_kid_absent_from_registry_rejected() {
    let (addr, _registry) = spawn_registry(&[TEST_KID]).await;
    let app = create_registry_app(format!("http://{addr}"));

    let token = mint_assertion("never-published", DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);

    assert_eq!(send(&app, &token).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unreachable_registry_is_transient_not_unauthorized() {
    // Nothing listens here; the failure is the infrastructure's, not the
    // caller's, so it must surface as 500 rather than 401.
    let app = create_registry_app("http://127.0.0.1:1".to_string());

    let token = mint_assertion(TEST_KID, DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);

    assert_eq!(send(&app, &token).await, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_registry_without_usable_keys_is_transient() {
    let (addr, registry) = spawn_registry(&[]).await;
    let app = create_registry_app(format!("http://{addr}"));

    let token = mint_assertion(TEST_KID, DEFAULT_ISSUER, Some(TEST_AUDIENCE), 3600);

    assert_eq!(send(&app, &token).await, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(registry.hits.load(Ordering::SeqCst) >= 1);
}
