//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup; nothing is re-evaluated while the
//! server is running.

use jsonwebtoken::Algorithm;
use std::env;
use std::str::FromStr;

/// Google's published JWK registry for IAP signing keys.
pub const DEFAULT_REGISTRY_URL: &str = "https://www.gstatic.com/iap/verify/public_key-jwk";

/// Header IAP attaches the signed assertion to.
pub const DEFAULT_IAP_HEADER: &str = "x-goog-iap-jwt-assertion";

/// Required `iss` claim value for IAP assertions.
pub const DEFAULT_ISSUER: &str = "https://cloud.google.com/iap";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether IAP verification is wired into the router at all.
    pub enabled: bool,
    /// JWK registry URL the verifier fetches signing keys from.
    pub registry_url: String,
    /// Signing algorithm IAP assertions must use.
    pub algorithm: Algorithm,
    /// Request header carrying the IAP assertion.
    pub header: String,
    /// Required issuer claim.
    pub issuer: String,
    /// Explicit expected audience. When unset, the audience is derived from
    /// the detected GCP environment at startup.
    pub audience: Option<String>,
    /// GCP project ID override. When unset, the metadata server is asked.
    pub project_id: Option<String>,
    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let algorithm = match env::var("IAP_ALGORITHM") {
            Ok(raw) => {
                Algorithm::from_str(raw.trim()).map_err(|_| ConfigError::InvalidAlgorithm(raw))?
            }
            Err(_) => Algorithm::ES256,
        };

        let enabled = match env::var("IAP_ENABLED") {
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(ConfigError::InvalidFlag("IAP_ENABLED", raw)),
            },
            Err(_) => true,
        };

        Ok(Self {
            enabled,
            registry_url: env::var("IAP_REGISTRY_URL")
                .unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string()),
            algorithm,
            header: env::var("IAP_HEADER")
                .map(|v| v.trim().to_ascii_lowercase())
                .unwrap_or_else(|_| DEFAULT_IAP_HEADER.to_string()),
            issuer: env::var("IAP_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string()),
            audience: env::var("IAP_AUDIENCE")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            project_id: env::var("GOOGLE_CLOUD_PROJECT")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
        })
    }

    /// Deterministic config for tests. No environment reads.
    pub fn test_default() -> Self {
        Self {
            enabled: true,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            algorithm: Algorithm::ES256,
            header: DEFAULT_IAP_HEADER.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: None,
            project_id: Some("test-project".to_string()),
            port: 8080,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unrecognized signing algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("{0} must be true or false, got: {1}")]
    InvalidFlag(&'static str, String),
}
