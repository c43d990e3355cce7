// SPDX-License-Identifier: MIT

//! Instance metadata server client.
//!
//! Compute Engine, GKE and App Engine Flexible all expose a local metadata
//! service at `metadata.google.internal`. This client covers the handful of
//! paths the startup wiring needs: project identity, instance attributes,
//! and an access token for the one Resource Manager call.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";
const METADATA_FLAVOR: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Response from the default service account token endpoint.
#[derive(Debug, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: String,
}

/// Client for the local instance metadata server.
pub struct MetadataClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    /// Create a client against the standard metadata host.
    ///
    /// `GCE_METADATA_HOST` overrides the host, matching the convention of
    /// Google's own client libraries (and letting tests point at a stub).
    pub fn new() -> anyhow::Result<Self> {
        let base_url = std::env::var("GCE_METADATA_HOST")
            .map(|host| format!("http://{host}"))
            .unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());

        Self::with_base_url(base_url)
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building metadata HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Current project's string ID (`project/project-id`).
    pub async fn project_id(&self) -> anyhow::Result<String> {
        self.fetch_text("computeMetadata/v1/project/project-id")
            .await
    }

    /// Current project's numeric ID (`project/numeric-project-id`).
    pub async fn numeric_project_id(&self) -> anyhow::Result<u64> {
        let raw = self
            .fetch_text("computeMetadata/v1/project/numeric-project-id")
            .await?;
        raw.parse()
            .with_context(|| format!("numeric-project-id is not numeric: {raw}"))
    }

    /// A custom instance attribute (`instance/attributes/{name}`).
    pub async fn instance_attribute(&self, name: &str) -> anyhow::Result<String> {
        self.fetch_text(&format!("computeMetadata/v1/instance/attributes/{name}"))
            .await
    }

    /// Access token for the instance's default service account.
    pub async fn access_token(&self) -> anyhow::Result<AccessToken> {
        let url = format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.base_url
        );

        let response = self
            .http_client
            .get(&url)
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .context("metadata token request failed")?
            .error_for_status()
            .context("metadata token request returned error status")?;

        response
            .json::<AccessToken>()
            .await
            .context("invalid metadata token JSON")
    }

    /// Probe whether the metadata server is reachable, i.e. whether we are
    /// running on a GCP compute substrate at all.
    pub async fn on_gce(&self) -> bool {
        let result = self
            .http_client
            .get(&self.base_url)
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .send()
            .await;

        match result {
            Ok(response) => response
                .headers()
                .get(METADATA_FLAVOR)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == METADATA_FLAVOR_VALUE)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn fetch_text(&self, path: &str) -> anyhow::Result<String> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .with_context(|| format!("metadata request failed: {path}"))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "metadata request {} returned status {}",
                path,
                response.status()
            );
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("metadata response body unreadable: {path}"))?;

        Ok(body.trim().to_string())
    }
}
