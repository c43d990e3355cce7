// SPDX-License-Identifier: MIT

//! GCP runtime environment detection.
//!
//! Runs once at startup to decide which audience derivation applies. App
//! Engine and GKE advertise themselves through environment variables; plain
//! Compute Engine is recognized by probing the metadata server.

use crate::services::metadata::MetadataClient;

/// The compute substrate the process is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcpEnvironment {
    AppEngineStandard,
    AppEngineFlexible,
    ComputeEngine,
    KubernetesEngine,
    Unknown,
}

impl GcpEnvironment {
    /// Either App Engine variant.
    pub fn is_app_engine(self) -> bool {
        matches!(
            self,
            GcpEnvironment::AppEngineStandard | GcpEnvironment::AppEngineFlexible
        )
    }

    /// Compute Engine or a container substrate built on it.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            GcpEnvironment::ComputeEngine | GcpEnvironment::KubernetesEngine
        )
    }
}

impl std::fmt::Display for GcpEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GcpEnvironment::AppEngineStandard => "app-engine-standard",
            GcpEnvironment::AppEngineFlexible => "app-engine-flexible",
            GcpEnvironment::ComputeEngine => "compute-engine",
            GcpEnvironment::KubernetesEngine => "kubernetes-engine",
            GcpEnvironment::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Environment variables consulted by detection, snapshotted so the
/// classification itself is a pure function.
#[derive(Debug, Default, Clone)]
pub struct EnvSnapshot {
    pub gae_env: Option<String>,
    pub gae_instance: Option<String>,
    pub kubernetes_service_host: Option<String>,
}

impl EnvSnapshot {
    pub fn current() -> Self {
        Self {
            gae_env: std::env::var("GAE_ENV").ok(),
            gae_instance: std::env::var("GAE_INSTANCE").ok(),
            kubernetes_service_host: std::env::var("KUBERNETES_SERVICE_HOST").ok(),
        }
    }
}

/// Detect the current environment. The metadata probe only runs when the
/// environment variables are inconclusive.
pub async fn detect(metadata: &MetadataClient) -> GcpEnvironment {
    let snapshot = EnvSnapshot::current();

    match classify(&snapshot) {
        Some(environment) => environment,
        None if metadata.on_gce().await => GcpEnvironment::ComputeEngine,
        None => GcpEnvironment::Unknown,
    }
}

/// Variable-based classification. `None` means "ask the metadata server".
fn classify(snapshot: &EnvSnapshot) -> Option<GcpEnvironment> {
    if snapshot.gae_env.as_deref() == Some("standard") {
        return Some(GcpEnvironment::AppEngineStandard);
    }

    if snapshot.gae_instance.is_some() {
        return Some(GcpEnvironment::AppEngineFlexible);
    }

    if snapshot.kubernetes_service_host.is_some() {
        return Some(GcpEnvironment::KubernetesEngine);
    }

    None
}
