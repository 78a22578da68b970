//! Error types for ads-core

use std::fmt;
use thiserror::Error;

/// Result type alias for auth pipeline operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Step of the credential pipeline an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Broker refresh token -> broker JWT
    BrokerJwt,
    /// Listing broker-managed identities
    BrokerIdentities,
    /// Broker JWT -> Amazon Ads access token
    BrokerToken,
    /// Refresh token grant against Amazon's OAuth endpoint
    OAuthRefresh,
    /// Authenticated call to the Amazon Ads API
    ApiRequest,
    /// Read-only call made while auto-detecting an identity
    IdentityCheck,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BrokerJwt => "broker jwt exchange",
            Self::BrokerIdentities => "broker identity listing",
            Self::BrokerToken => "broker token fetch",
            Self::OAuthRefresh => "oauth refresh",
            Self::ApiRequest => "ads api request",
            Self::IdentityCheck => "identity check",
        };
        f.write_str(name)
    }
}

/// Auth pipeline error types
///
/// Cloneable so that every caller waiting on a shared mint observes the same
/// outcome.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Credentials rejected for identity {identity} during {stage}: {detail}")]
    Rejected {
        identity: String,
        stage: AuthStage,
        detail: String,
    },

    #[error("Transient network failure during {stage}: {detail}")]
    Transient { stage: AuthStage, detail: String },

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("No active identity - select one with set_active_identity or configure a default")]
    NoActiveIdentity,

    #[error("Unknown region: {0} (expected one of na, eu, fe)")]
    UnknownRegion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid upstream response during {stage}: {detail}")]
    InvalidResponse { stage: AuthStage, detail: String },
}

impl AuthError {
    /// Whether the caller may retry with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify a reqwest transport failure (connect, timeout, body read)
    pub(crate) fn from_transport(stage: AuthStage, err: &reqwest::Error) -> Self {
        let detail = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else if err.is_decode() {
            "response body could not be decoded".to_string()
        } else {
            format!("transport error: {}", err)
        };
        Self::Transient { stage, detail }
    }

    /// Classify a non-success HTTP status from a token or broker endpoint
    pub(crate) fn from_status(
        identity: &str,
        stage: AuthStage,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        let detail = format!("HTTP {} - {}", status.as_u16(), truncate_body(body));
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::Transient { stage, detail }
        } else {
            Self::Rejected {
                identity: identity.to_string(),
                stage,
                detail,
            }
        }
    }
}

/// Cap upstream bodies before they land in an error message
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX).collect();
        format!("{}...", head)
    }
}
