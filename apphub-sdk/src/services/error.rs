use apphub_core::error::AppError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::services::rbac::Role;

/// Why `validate` refused a token. The codes are stable; branch on them,
/// never on the detail text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum TokenRejection {
    Expired,
    InvalidSignature,
    ClaimValidation(String),
    NotLicensed,
    MissingClaim(String),
    Malformed(String),
    KeyUnavailable(String),
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::Expired => "expired",
            TokenRejection::InvalidSignature => "invalid_signature",
            TokenRejection::ClaimValidation(_) => "claim_validation",
            TokenRejection::NotLicensed => "not_licensed",
            TokenRejection::MissingClaim(_) => "missing_claim",
            TokenRejection::Malformed(_) => "malformed",
            TokenRejection::KeyUnavailable(_) => "key_unavailable",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRejection::Expired => write!(f, "Token has expired"),
            TokenRejection::InvalidSignature => write!(f, "Token signature is invalid"),
            TokenRejection::ClaimValidation(detail) => {
                write!(f, "Token claim validation failed: {}", detail)
            }
            TokenRejection::NotLicensed => {
                write!(f, "Entity does not hold a license for this application")
            }
            TokenRejection::MissingClaim(claim) => write!(f, "Missing required claim: {}", claim),
            TokenRejection::Malformed(detail) => write!(f, "Malformed token: {}", detail),
            TokenRejection::KeyUnavailable(detail) => {
                write!(f, "No verification key available: {}", detail)
            }
        }
    }
}

/// What a failed guard was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    MissingPermission(String),
    MissingAnyPermission(Vec<String>),
    RequiredRole(Role),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::MissingPermission(permission) => {
                write!(f, "missing permission '{}'", permission)
            }
            Denial::MissingAnyPermission(permissions) => {
                write!(f, "requires one of [{}]", permissions.join(", "))
            }
            Denial::RequiredRole(role) => write!(f, "requires role '{}' or higher", role),
        }
    }
}

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Application is not licensed for this entity")]
    NotLicensed,

    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    #[error("Invalid token: {0}")]
    InvalidToken(TokenRejection),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(Denial),

    #[error("Access to record denied by scope")]
    ScopeAccessDenied,

    #[error("OAuth error {error} (HTTP {status}){}", describe(.error_description))]
    OAuth {
        status: u16,
        error: String,
        error_description: Option<String>,
    },

    #[error("Token revocation failed (HTTP {status})")]
    RevocationFailed { status: u16 },

    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Invalid webhook signature")]
    WebhookInvalidSignature,

    #[error("Webhook payload is not valid JSON: {0}")]
    WebhookParse(String),

    #[error("Invalid webhook payload: {0}")]
    WebhookInvalidPayload(String),

    #[error("Webhook handler failed: {0}")]
    WebhookHandler(anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

impl SdkError {
    /// Lift a token rejection into the matching error kind.
    pub fn from_rejection(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired => SdkError::Expired,
            TokenRejection::InvalidSignature => SdkError::InvalidSignature,
            TokenRejection::NotLicensed => SdkError::NotLicensed,
            TokenRejection::MissingClaim(claim) => SdkError::MissingClaim(claim),
            other => SdkError::InvalidToken(other),
        }
    }
}

impl From<SdkError> for AppError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::InvalidSignature
            | SdkError::Expired
            | SdkError::NotLicensed
            | SdkError::MissingClaim(_)
            | SdkError::InvalidToken(_)
            | SdkError::WebhookInvalidSignature => AppError::Unauthorized(anyhow::anyhow!(err)),
            // Permission names stay out of the response body; hosts log them.
            SdkError::AuthorizationDenied(_) => {
                AppError::Forbidden(anyhow::anyhow!("Insufficient permissions"))
            }
            SdkError::ScopeAccessDenied => {
                AppError::Forbidden(anyhow::anyhow!("Access to this record is not permitted"))
            }
            SdkError::InvalidFormat(_)
            | SdkError::WebhookParse(_)
            | SdkError::WebhookInvalidPayload(_) => AppError::BadRequest(anyhow::anyhow!(err)),
            SdkError::OAuth { .. }
            | SdkError::RevocationFailed { .. }
            | SdkError::DiscoveryFailed(_)
            | SdkError::Http(_) => AppError::BadGateway(err.to_string()),
            SdkError::WebhookHandler(e) => AppError::InternalError(e),
            SdkError::Config(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_rejection_codes_are_stable() {
        assert_eq!(TokenRejection::Expired.as_str(), "expired");
        assert_eq!(TokenRejection::InvalidSignature.as_str(), "invalid_signature");
        assert_eq!(TokenRejection::NotLicensed.as_str(), "not_licensed");
        assert_eq!(
            TokenRejection::MissingClaim("tenant_tier".into()).as_str(),
            "missing_claim"
        );
    }

    #[test]
    fn test_rejection_lifts_to_distinct_kinds() {
        assert!(matches!(
            SdkError::from_rejection(TokenRejection::Expired),
            SdkError::Expired
        ));
        assert!(matches!(
            SdkError::from_rejection(TokenRejection::NotLicensed),
            SdkError::NotLicensed
        ));
        assert!(matches!(
            SdkError::from_rejection(TokenRejection::Malformed("x".into())),
            SdkError::InvalidToken(TokenRejection::Malformed(_))
        ));
    }

    #[test]
    fn test_app_error_mapping() {
        let denied: AppError =
            SdkError::AuthorizationDenied(Denial::MissingPermission("vehicles:delete".into()))
                .into();
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
        assert!(!denied.to_string().contains("vehicles:delete"));

        let expired: AppError = SdkError::Expired.into();
        assert_eq!(expired.status_code(), StatusCode::UNAUTHORIZED);

        let upstream: AppError = SdkError::OAuth {
            status: 400,
            error: "invalid_grant".into(),
            error_description: None,
        }
        .into();
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_oauth_error_display_includes_description() {
        let err = SdkError::OAuth {
            status: 400,
            error: "invalid_grant".into(),
            error_description: Some("code expired".into()),
        };
        assert_eq!(
            err.to_string(),
            "OAuth error invalid_grant (HTTP 400): code expired"
        );
    }
}
