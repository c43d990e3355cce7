// SPDX-License-Identifier: MIT

//! Cloud Resource Manager lookups.
//!
//! The only call this crate needs is mapping a project ID to its numeric
//! project number. The v1 REST surface is thin enough that a direct
//! `reqwest` call beats pulling in a generated SDK client.

use crate::services::metadata::MetadataClient;
use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://cloudresourcemanager.googleapis.com";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Project metadata returned by `GET /v1/projects/{id}`.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub project_id: String,
    pub project_number: u64,
}

/// The v1 API serializes the project number as a JSON string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResource {
    project_id: String,
    project_number: String,
}

/// Client for the Cloud Resource Manager v1 API.
pub struct ResourceManagerClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ResourceManagerClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against an explicit base URL (stub servers in tests).
    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building Resource Manager HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Look up a project by ID, authorized with the instance's default
    /// service account token. Fails without retry; callers treat this as a
    /// startup failure.
    pub async fn get_project(
        &self,
        project_id: &str,
        metadata: &MetadataClient,
    ) -> anyhow::Result<ProjectInfo> {
        if project_id.trim().is_empty() {
            anyhow::bail!("project ID must not be empty");
        }

        let token = metadata
            .access_token()
            .await
            .context("failed fetching access token for Resource Manager")?;

        let url = format!("{}/v1/projects/{}", self.base_url, project_id);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .with_context(|| format!("Resource Manager request failed for {project_id}"))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Resource Manager returned status {} for project {}",
                response.status(),
                project_id
            );
        }

        let resource: ProjectResource = response
            .json()
            .await
            .context("invalid Resource Manager project JSON")?;

        let project_number = resource.project_number.parse().with_context(|| {
            format!("non-numeric projectNumber: {}", resource.project_number)
        })?;

        Ok(ProjectInfo {
            project_id: resource.project_id,
            project_number,
        })
    }
}
