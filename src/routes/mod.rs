// SPDX-License-Identifier: MIT

//! HTTP route handlers.

use crate::middleware::iap::{require_iap, IapUser};
use crate::AppState;
use axum::{middleware, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check response
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct IdentityResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Return the identity IAP verified for this request.
///
/// The extension is absent when verification is disabled by configuration.
async fn identity(user: Option<Extension<IapUser>>) -> Json<IdentityResponse> {
    match user {
        Some(Extension(user)) => Json(IdentityResponse {
            authenticated: true,
            subject: Some(user.subject),
            email: user.email,
        }),
        None => Json(IdentityResponse {
            authenticated: false,
            subject: None,
            email: None,
        }),
    }
}

/// Build the complete router.
///
/// When IAP verification is disabled by configuration, the auth layer is
/// not installed at all and protected routes behave like public ones.
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(health_check));

    let mut protected_routes = Router::new().route("/identity", get(identity));
    if state.config.enabled {
        protected_routes = protected_routes
            .route_layer(middleware::from_fn_with_state(state.clone(), require_iap));
    } else {
        tracing::warn!("IAP verification disabled by configuration");
    }

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
