//! Credential providers
//!
//! A provider owns one authentication pathway. It can enumerate the identities
//! it serves and mint fresh [`Credentials`] for any of them. Providers hold an
//! HTTP client; they never retry on their own. Transient failures are reported
//! as [`AuthError::Transient`] and left to the caller.
//!
//! [`AuthError::Transient`]: crate::error::AuthError::Transient

mod direct;
mod openbridge;

pub use direct::{DirectProvider, DIRECT_IDENTITY_ID};
pub use openbridge::{OpenbridgeProvider, AMAZON_ADS_IDENTITY_TYPE};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::credential::{Credentials, Identity, IdentityKind};
use crate::error::{AuthError, AuthStage, Result};
use crate::region::RegionRouter;
use crate::settings::{ProviderSettings, Settings};

/// Lifetime assumed when a token response omits `expires_in`
pub(crate) const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// One authentication pathway
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Pathway served by this provider
    fn kind(&self) -> IdentityKind;

    /// Enumerate identities this provider can mint for
    async fn list_identities(&self) -> Result<Vec<Identity>>;

    /// Produce fresh credentials for an identity
    async fn mint(&self, identity: &Identity) -> Result<Credentials>;
}

/// Build the provider selected by the settings
pub fn from_settings(
    settings: &Settings,
    router: RegionRouter,
) -> Result<Arc<dyn CredentialProvider>> {
    let http = build_http_client(settings.http_timeout)?;
    let provider: Arc<dyn CredentialProvider> = match &settings.provider {
        ProviderSettings::Direct(direct) => {
            Arc::new(DirectProvider::new(direct.clone(), router, http))
        }
        ProviderSettings::Openbridge(openbridge) => {
            Arc::new(OpenbridgeProvider::new(openbridge.clone(), router, http))
        }
    };
    Ok(provider)
}

/// HTTP client with an explicit per-request timeout
pub fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::Config(format!("failed to create HTTP client: {}", e)))
}

/// OAuth2 token response (`/auth/o2/token`)
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Two-state attempt counter for the single re-authentication retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    First,
    Retry,
}

/// Absolute expiry from a relative lifetime
///
/// Missing, non-positive and unrepresentable lifetimes all fall back to
/// [`DEFAULT_TOKEN_LIFETIME_SECS`].
pub(crate) fn expiry_from(expires_in: Option<i64>) -> DateTime<Utc> {
    let now = Utc::now();
    let fallback = now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS);

    expires_in
        .filter(|secs| *secs > 0)
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(fallback)
}

/// Read a response body, mapping transport failures
pub(crate) async fn read_body(stage: AuthStage, response: reqwest::Response) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| AuthError::from_transport(stage, &e))
}
