// SPDX-License-Identifier: MIT

//! IAP assertion verification against Google's JWK registry.

use crate::config::Config;
use crate::services::audience::AudienceValidator;
use anyhow::Context;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Verified IAP identity extracted from a valid assertion.
#[derive(Debug, Clone)]
pub struct IapPrincipal {
    pub subject: String,
    pub email: Option<String>,
    pub audiences: Vec<String>,
}

/// Verification error categories.
#[derive(Debug, Clone)]
pub enum VerifyError {
    /// The assertion is missing/invalid or claims do not match expectations.
    Unauthenticated(String),
    /// A transient infrastructure failure occurred (registry unreachable).
    Transient(String),
}

#[derive(Clone)]
enum VerifierMode {
    Registry,
    StaticKey {
        kid: String,
        decoding_key: Arc<DecodingKey>,
    },
}

#[derive(Clone)]
struct JwksCacheEntry {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for IAP-issued JWT assertions.
///
/// Signature keys come from the configured JWK registry and are cached by
/// `kid` with a TTL taken from the registry's `Cache-Control` header. All
/// claim checks other than the audience are delegated to `jsonwebtoken`;
/// the audience check runs afterwards against the resolved
/// [`AudienceValidator`], if one was resolved at startup.
pub struct IapVerifier {
    http_client: reqwest::Client,
    registry_url: String,
    algorithm: Algorithm,
    issuer: String,
    audience: Option<AudienceValidator>,
    mode: VerifierMode,
    jwks_cache: RwLock<Option<JwksCacheEntry>>,
    refresh_lock: Mutex<()>,
}

impl IapVerifier {
    /// Create a production verifier that fetches and caches registry keys.
    pub fn new(config: &Config, audience: Option<AudienceValidator>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building JWK registry HTTP client")?;

        match &audience {
            Some(validator) => tracing::info!(
                registry = %config.registry_url,
                issuer = %config.issuer,
                audience = %validator.expected_audience(),
                "Initialized IAP verifier"
            ),
            None => tracing::info!(
                registry = %config.registry_url,
                issuer = %config.issuer,
                "Initialized IAP verifier without audience check"
            ),
        }

        Ok(Self {
            http_client,
            registry_url: config.registry_url.clone(),
            algorithm: config.algorithm,
            issuer: config.issuer.clone(),
            audience,
            mode: VerifierMode::Registry,
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Create a verifier with a single static verification key.
    ///
    /// This is intended for deterministic local/integration tests.
    pub fn new_with_static_key(
        config: &Config,
        audience: Option<AudienceValidator>,
        kid: impl Into<String>,
        decoding_key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static verifier kid must not be empty");
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building JWK registry HTTP client")?;

        Ok(Self {
            http_client,
            registry_url: config.registry_url.clone(),
            algorithm: config.algorithm,
            issuer: config.issuer.clone(),
            audience,
            mode: VerifierMode::StaticKey {
                kid,
                decoding_key: Arc::new(decoding_key),
            },
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Verify an IAP assertion and extract the authenticated principal.
    pub async fn verify(&self, token: &str) -> Result<IapPrincipal, VerifyError> {
        let header = decode_header(token)
            .map_err(|e| VerifyError::Unauthenticated(format!("invalid JWT header: {e}")))?;

        if header.alg != self.algorithm {
            return Err(VerifyError::Unauthenticated(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Unauthenticated("missing JWT kid".to_string()))?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(self.algorithm);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        // The audience check is ours, not jsonwebtoken's: it may be absent
        // entirely, and the claim may be a string or an array.
        validation.validate_aud = false;
        validation.leeway = CLOCK_SKEW_SECS;

        let token_data = decode::<IapClaims>(token, decoding_key.as_ref(), &validation)
            .map_err(|e| VerifyError::Unauthenticated(format!("JWT validation failed: {e}")))?;

        let claims = token_data.claims;

        validate_iat(claims.iat)?;

        let audiences = claims.aud.map(Audience::into_vec).unwrap_or_default();

        if let Some(validator) = &self.audience {
            validator
                .validate(&audiences)
                .map_err(|e| VerifyError::Unauthenticated(e.to_string()))?;
        }

        tracing::debug!(
            subject = %claims.sub,
            email = claims.email.as_deref().unwrap_or("<missing>"),
            audiences = ?audiences,
            issuer = %claims.iss,
            "IAP assertion verified"
        );

        Ok(IapPrincipal {
            subject: claims.sub,
            email: claims.email,
            audiences,
        })
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, VerifyError> {
        match &self.mode {
            VerifierMode::StaticKey {
                kid: static_kid,
                decoding_key,
            } => {
                if kid == static_kid {
                    return Ok(decoding_key.clone());
                }

                return Err(VerifyError::Unauthenticated(format!(
                    "unknown JWT kid for static verifier: {kid}"
                )));
            }
            VerifierMode::Registry => {}
        }

        if let Some(key) = self.lookup_cached_key(kid).await {
            return Ok(key);
        }

        // Key rotation: one forced refresh before declaring the kid unknown.
        for force_refresh in [false, true] {
            self.refresh_jwks(force_refresh).await?;
            if let Some(key) = self.lookup_cached_key(kid).await {
                return Ok(key);
            }
        }

        Err(VerifyError::Unauthenticated(format!(
            "JWT kid not found in registry after refresh: {kid}"
        )))
    }

    async fn lookup_cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.jwks_cache.read().await;
        let now = Instant::now();
        cache
            .as_ref()
            .filter(|entry| entry.expires_at > now)
            .and_then(|entry| entry.keys_by_kid.get(kid))
            .cloned()
    }

    async fn refresh_jwks(&self, force_refresh: bool) -> Result<(), VerifyError> {
        let _guard = self.refresh_lock.lock().await;

        if !force_refresh {
            let cache = self.jwks_cache.read().await;
            if cache
                .as_ref()
                .is_some_and(|entry| entry.expires_at > Instant::now())
            {
                return Ok(());
            }
        }

        tracing::debug!(registry = %self.registry_url, "Refreshing IAP JWK cache");

        let response = self
            .http_client
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| VerifyError::Transient(format!("registry request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VerifyError::Transient(format!(
                "registry request returned status {}",
                response.status()
            )));
        }

        let ttl = cache_ttl_from_headers(response.headers(), DEFAULT_CACHE_TTL);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| VerifyError::Transient(format!("invalid registry JSON: {e}")))?;

        let mut keys_by_kid: HashMap<String, Arc<DecodingKey>> = HashMap::new();

        for jwk in jwks.keys {
            if jwk.kid.trim().is_empty() {
                continue;
            }

            if let Some(use_) = &jwk.use_ {
                if use_ != "sig" {
                    continue;
                }
            }

            match self.key_from_jwk(&jwk) {
                Ok(Some(key)) => {
                    keys_by_kid.insert(jwk.kid, Arc::new(key));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid registry key");
                }
            }
        }

        if keys_by_kid.is_empty() {
            return Err(VerifyError::Transient(
                "registry response did not include any usable keys".to_string(),
            ));
        }

        let entry = JwksCacheEntry {
            keys_by_kid,
            expires_at: Instant::now() + ttl,
        };

        *self.jwks_cache.write().await = Some(entry);

        tracing::debug!(ttl_secs = ttl.as_secs(), "IAP JWK cache refreshed");
        Ok(())
    }

    /// Build a decoding key from one registry entry. IAP publishes P-256
    /// EC keys; anything else is skipped rather than treated as an error.
    fn key_from_jwk(&self, jwk: &Jwk) -> anyhow::Result<Option<DecodingKey>> {
        if self.algorithm != Algorithm::ES256 || jwk.kty != "EC" {
            return Ok(None);
        }

        if jwk.crv.as_deref() != Some("P-256") {
            return Ok(None);
        }

        let x = jwk.x.as_deref().context("EC key missing x coordinate")?;
        let y = jwk.y.as_deref().context("EC key missing y coordinate")?;

        Ok(Some(DecodingKey::from_ec_components(x, y)?))
    }
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
}

/// The `aud` claim: a single string in IAP practice, but tolerate the
/// array form the JWT spec allows.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IapClaims {
    iss: String,
    aud: Option<Audience>,
    sub: String,
    #[allow(dead_code)]
    exp: usize,
    iat: Option<usize>,
    email: Option<String>,
}

fn validate_iat(iat: Option<usize>) -> Result<(), VerifyError> {
    let now = now_unix_secs();

    let Some(iat) = iat else {
        return Err(VerifyError::Unauthenticated("missing iat claim".to_string()));
    };

    if iat as u64 > now + CLOCK_SKEW_SECS {
        return Err(VerifyError::Unauthenticated(
            "iat claim is in the future".to_string(),
        ));
    }

    Ok(())
}

fn cache_ttl_from_headers(headers: &reqwest::header::HeaderMap, fallback: Duration) -> Duration {
    let Some(max_age) = headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_cache_control_max_age)
    else {
        return fallback;
    };

    Duration::from_secs(max_age)
}

fn parse_cache_control_max_age(value: &str) -> Option<u64> {
    for directive in value.split(',') {
        let directive = directive.trim();

        if let Some(raw) = directive.strip_prefix("max-age=") {
            let raw = raw.trim_matches('"');
            if let Ok(seconds) = raw.parse::<u64>() {
                return Some(seconds);
            }
        }
    }

    None
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Public half of a throwaway P-256 keypair.
    const TEST_X: &str = "cNvEVf3da2bZeBg_L0vnb0k4CX2OCh5GILIxv7OzK5g";
    const TEST_Y: &str = "LCvRb_n8OBMFYq8bjDq5S3zETFde4ZS0ZZruPQO3sz8";

    fn test_verifier() -> IapVerifier {
        let config = crate::config::Config::test_default();
        IapVerifier::new_with_static_key(
            &config,
            None,
            "test-key",
            DecodingKey::from_ec_components(TEST_X, TEST_Y).unwrap(),
        )
        .unwrap()
    }

    fn ec_jwk(kid: &str, crv: &str) -> Jwk {
        Jwk {
            kid: kid.to_string(),
            kty: "EC".to_string(),
            crv: Some(crv.to_string()),
            x: Some(TEST_X.to_string()),
            y: Some(TEST_Y.to_string()),
            use_: Some("sig".to_string()),
        }
    }

    #[test]
    fn key_from_jwk_accepts_p256_ec_keys_only() {
        let verifier = test_verifier();

        assert!(verifier
            .key_from_jwk(&ec_jwk("key-1", "P-256"))
            .unwrap()
            .is_some());

        // Other curves and key families are skipped, not errors.
        assert!(verifier
            .key_from_jwk(&ec_jwk("key-2", "P-384"))
            .unwrap()
            .is_none());

        let rsa = Jwk {
            kid: "key-3".to_string(),
            kty: "RSA".to_string(),
            crv: None,
            x: None,
            y: None,
            use_: Some("sig".to_string()),
        };
        assert!(verifier.key_from_jwk(&rsa).unwrap().is_none());
    }

    #[test]
    fn key_from_jwk_rejects_truncated_ec_key() {
        let verifier = test_verifier();

        let mut jwk = ec_jwk("key-1", "P-256");
        jwk.y = None;
        assert!(verifier.key_from_jwk(&jwk).is_err());
    }

    #[test]
    fn parse_cache_control_max_age_valid() {
        assert_eq!(
            parse_cache_control_max_age("public, max-age=3600"),
            Some(3600)
        );
        assert_eq!(parse_cache_control_max_age("max-age=60"), Some(60));
        assert_eq!(parse_cache_control_max_age("max-age=\"120\""), Some(120));
    }

    #[test]
    fn parse_cache_control_max_age_invalid() {
        assert_eq!(parse_cache_control_max_age("public, immutable"), None);
        assert_eq!(parse_cache_control_max_age("max-age=abc"), None);
        assert_eq!(parse_cache_control_max_age(""), None);
    }

    #[test]
    fn audience_claim_accepts_both_forms() {
        let one: Audience = serde_json::from_str("\"aud1\"").unwrap();
        assert_eq!(one.into_vec(), vec!["aud1".to_string()]);

        let many: Audience = serde_json::from_str("[\"aud1\", \"aud2\"]").unwrap();
        assert_eq!(
            many.into_vec(),
            vec!["aud1".to_string(), "aud2".to_string()]
        );
    }

    #[test]
    fn validate_iat_rejects_future_and_missing() {
        assert!(matches!(
            validate_iat(None),
            Err(VerifyError::Unauthenticated(_))
        ));

        let future = (now_unix_secs() + CLOCK_SKEW_SECS + 600) as usize;
        assert!(matches!(
            validate_iat(Some(future)),
            Err(VerifyError::Unauthenticated(_))
        ));

        let now = now_unix_secs() as usize;
        assert!(validate_iat(Some(now)).is_ok());
    }
}
