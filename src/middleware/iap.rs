// SPDX-License-Identifier: MIT

//! IAP assertion authentication middleware.

use crate::error::AppError;
use crate::services::verifier::VerifyError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authenticated IAP identity, inserted into request extensions for
/// downstream handlers.
#[derive(Debug, Clone)]
pub struct IapUser {
    pub subject: String,
    pub email: Option<String>,
}

/// Read the IAP assertion from the configured request header.
///
/// A plain header read; IAP sends the bare JWT with no `Bearer ` prefix.
pub fn assertion_token<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Require a valid IAP assertion on every request passing through.
pub async fn require_iap(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = match assertion_token(request.headers(), &state.config.header) {
        Some(token) => token.to_string(),
        None => {
            tracing::warn!(
                header = %state.config.header,
                "Blocked request without IAP assertion header"
            );
            return Err(AppError::Unauthorized);
        }
    };

    let principal = state.verifier.verify(&token).await.map_err(|err| match err {
        VerifyError::Unauthenticated(reason) => AppError::InvalidToken(reason),
        VerifyError::Transient(reason) => {
            AppError::Internal(anyhow::anyhow!("IAP verification transient failure: {reason}"))
        }
    })?;

    let user = IapUser {
        subject: principal.subject,
        email: principal.email,
    };
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_assertion_token_reads_configured_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-iap-jwt-assertion",
            HeaderValue::from_static("header.payload.sig"),
        );

        assert_eq!(
            assertion_token(&headers, "x-goog-iap-jwt-assertion"),
            Some("header.payload.sig")
        );
        assert_eq!(assertion_token(&headers, "x-other-header"), None);
    }

    #[test]
    fn test_assertion_token_absent_or_blank() {
        let headers = HeaderMap::new();
        assert_eq!(assertion_token(&headers, "x-goog-iap-jwt-assertion"), None);

        let mut blank = HeaderMap::new();
        blank.insert("x-goog-iap-jwt-assertion", HeaderValue::from_static("  "));
        assert_eq!(assertion_token(&blank, "x-goog-iap-jwt-assertion"), None);
    }
}
