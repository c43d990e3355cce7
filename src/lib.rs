// SPDX-License-Identifier: MIT

//! IAP-authenticated service shell for Google Cloud.
//!
//! Verifies the signed JWT assertion Google Cloud Identity-Aware Proxy
//! attaches to proxied requests (`x-goog-iap-jwt-assertion`), including
//! audience derivation from the surrounding GCP environment, and exposes
//! the verified identity to request handlers.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;

use config::Config;
use services::IapVerifier;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub verifier: IapVerifier,
}
