// SPDX-License-Identifier: MIT

//! Expected-audience derivation and validation.
//!
//! IAP signs an `aud` claim tied to the resource it fronts. The expected
//! value is either configured explicitly or derived once at startup from
//! project metadata, depending on the detected compute substrate.

use crate::config::Config;
use crate::services::environment::GcpEnvironment;
use crate::services::metadata::MetadataClient;
use crate::services::resource_manager::ResourceManagerClient;
use anyhow::Context;

/// Instance attribute carrying the IAP backend service ID on Compute
/// Engine / GKE. The metadata server has no first-class endpoint for it.
const BACKEND_SERVICE_ID_ATTRIBUTE: &str = "backend-service-id";

/// Holds exactly one expected audience string, immutable after
/// construction, and checks token audience claims against it.
#[derive(Debug, Clone)]
pub struct AudienceValidator {
    expected: String,
}

impl AudienceValidator {
    /// Validator for an explicitly configured audience.
    pub fn new(audience: impl Into<String>) -> anyhow::Result<Self> {
        let expected = audience.into();
        if expected.trim().is_empty() {
            anyhow::bail!("expected audience must not be empty");
        }

        Ok(Self { expected })
    }

    /// Derive the App Engine audience: `/projects/{number}/apps/{id}`.
    ///
    /// The project number comes from a Resource Manager lookup; a failed
    /// lookup aborts startup, there is no retry.
    pub async fn for_app_engine(
        project_id: &str,
        resource_manager: &ResourceManagerClient,
        metadata: &MetadataClient,
    ) -> anyhow::Result<Self> {
        if project_id.trim().is_empty() {
            anyhow::bail!("project ID must not be empty");
        }

        let project = resource_manager
            .get_project(project_id, metadata)
            .await
            .context("App Engine audience derivation failed")?;

        Self::new(format!(
            "/projects/{}/apps/{}",
            project.project_number, project_id
        ))
    }

    /// Derive the Compute Engine / container audience:
    /// `/projects/{number}/global/backendServices/{service_id}`.
    pub async fn for_compute_engine(
        project_id: &str,
        resource_manager: &ResourceManagerClient,
        metadata: &MetadataClient,
    ) -> anyhow::Result<Self> {
        if project_id.trim().is_empty() {
            anyhow::bail!("project ID must not be empty");
        }

        let project = resource_manager
            .get_project(project_id, metadata)
            .await
            .context("Compute Engine audience derivation failed")?;

        let backend_service_id = metadata
            .instance_attribute(BACKEND_SERVICE_ID_ATTRIBUTE)
            .await
            .context("failed reading backend-service-id instance attribute")?;

        Self::new(format!(
            "/projects/{}/global/backendServices/{}",
            project.project_number, backend_service_id
        ))
    }

    pub fn expected_audience(&self) -> &str {
        &self.expected
    }

    /// Check a token's claimed audience set. Succeeds iff the expected
    /// string is a member. Pure; no side effects.
    pub fn validate(&self, claimed: &[String]) -> Result<(), InvalidAudience> {
        if claimed.iter().any(|aud| aud == &self.expected) {
            Ok(())
        } else {
            Err(InvalidAudience {
                expected: self.expected.clone(),
                claimed: claimed.to_vec(),
            })
        }
    }
}

/// Audience claim did not contain the expected value.
#[derive(Debug, thiserror::Error)]
#[error("invalid audience: expected {expected}, token claimed {claimed:?}")]
pub struct InvalidAudience {
    pub expected: String,
    pub claimed: Vec<String>,
}

/// Pick the audience validator for this deployment, once, at startup.
///
/// Precedence: explicit configuration, then App Engine derivation, then
/// Compute Engine / container derivation. Anywhere else no validator is
/// produced and the audience claim goes unchecked. The project ID is only
/// resolved on the derivation branches, so running outside GCP without an
/// explicit audience does not fail startup.
pub async fn resolve_audience_validator(
    config: &Config,
    environment: GcpEnvironment,
    resource_manager: &ResourceManagerClient,
    metadata: &MetadataClient,
) -> anyhow::Result<Option<AudienceValidator>> {
    if let Some(audience) = &config.audience {
        let validator = AudienceValidator::new(audience.clone())?;
        tracing::info!(audience = %validator.expected_audience(), "Using configured IAP audience");
        return Ok(Some(validator));
    }

    if environment.is_app_engine() {
        let project_id = resolve_project_id(config, metadata).await?;
        let validator =
            AudienceValidator::for_app_engine(&project_id, resource_manager, metadata).await?;
        tracing::info!(
            environment = %environment,
            audience = %validator.expected_audience(),
            "Derived App Engine IAP audience"
        );
        return Ok(Some(validator));
    }

    if environment.is_container() {
        let project_id = resolve_project_id(config, metadata).await?;
        let validator =
            AudienceValidator::for_compute_engine(&project_id, resource_manager, metadata).await?;
        tracing::info!(
            environment = %environment,
            audience = %validator.expected_audience(),
            "Derived Compute Engine IAP audience"
        );
        return Ok(Some(validator));
    }

    tracing::warn!(
        environment = %environment,
        "No explicit audience and no recognized GCP environment; \
         audience claim will not be checked"
    );
    Ok(None)
}

/// Configured project ID wins; otherwise ask the metadata server.
async fn resolve_project_id(config: &Config, metadata: &MetadataClient) -> anyhow::Result<String> {
    if let Some(project_id) = &config.project_id {
        return Ok(project_id.clone());
    }

    metadata
        .project_id()
        .await
        .context("no configured project ID and metadata lookup failed")
}
