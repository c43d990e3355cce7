// SPDX-License-Identifier: MIT

//! IAP-authenticated API server.
//!
//! Assembles the verification chain once at startup: configuration,
//! environment detection, audience resolution, then the JWK-backed
//! verifier, and serves protected routes behind it.

use gcp_iap_auth::{
    config::Config,
    services::{audience, environment, IapVerifier, MetadataClient, ResourceManagerClient},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting IAP-authenticated API");

    let metadata = MetadataClient::new().expect("Failed to build metadata client");
    let resource_manager =
        ResourceManagerClient::new().expect("Failed to build Resource Manager client");

    let verifier = if config.enabled {
        let detected = environment::detect(&metadata).await;
        tracing::info!(environment = %detected, "Detected GCP environment");

        let audience_validator =
            audience::resolve_audience_validator(&config, detected, &resource_manager, &metadata)
                .await?;

        IapVerifier::new(&config, audience_validator)?
    } else {
        // Feature disabled: the router installs no auth layer, but state
        // still carries a verifier for uniformity.
        IapVerifier::new(&config, None)?
    };

    let state = Arc::new(AppState {
        config: config.clone(),
        verifier,
    });

    let app = gcp_iap_auth::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gcp_iap_auth=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
