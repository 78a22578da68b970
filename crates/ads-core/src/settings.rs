//! Environment-sourced configuration
//!
//! Settings are read once at startup. Secrets are wrapped in [`SecretString`]
//! immediately so they never appear in `Debug` output.

use std::time::Duration;
use tracing::debug;

use crate::error::{AuthError, Result};
use crate::region::Region;
use crate::secret::SecretString;

pub const DEFAULT_OPENBRIDGE_AUTH_BASE_URL: &str = "https://authentication.api.openbridge.io";
pub const DEFAULT_OPENBRIDGE_IDENTITY_BASE_URL: &str = "https://remote-identity.api.openbridge.io";
pub const DEFAULT_OPENBRIDGE_SERVICE_BASE_URL: &str = "https://service.api.openbridge.io";

/// Direct client-credential pathway configuration
#[derive(Debug, Clone)]
pub struct DirectSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

/// Openbridge brokered pathway configuration
#[derive(Debug, Clone)]
pub struct OpenbridgeSettings {
    /// Server-wide broker refresh token; `None` when every caller brings one
    pub refresh_token: Option<SecretString>,
    pub remote_identity_id: Option<String>,
    pub auth_base_url: String,
    pub identity_base_url: String,
    pub service_base_url: String,
}

impl OpenbridgeSettings {
    /// Settings pointing at the public Openbridge endpoints
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: Some(SecretString::new(refresh_token)),
            ..Self::caller_supplied()
        }
    }

    /// Public endpoints without a server-wide refresh token
    pub fn caller_supplied() -> Self {
        Self {
            refresh_token: None,
            remote_identity_id: None,
            auth_base_url: DEFAULT_OPENBRIDGE_AUTH_BASE_URL.to_string(),
            identity_base_url: DEFAULT_OPENBRIDGE_IDENTITY_BASE_URL.to_string(),
            service_base_url: DEFAULT_OPENBRIDGE_SERVICE_BASE_URL.to_string(),
        }
    }

    /// Same endpoints, different refresh token
    pub fn with_refresh_token(&self, refresh_token: SecretString) -> Self {
        Self {
            refresh_token: Some(refresh_token),
            ..self.clone()
        }
    }

    /// Point every Openbridge service at one base URL (test servers)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        self.auth_base_url = base.clone();
        self.identity_base_url = base.clone();
        self.service_base_url = base;
        self
    }
}

/// Which pathway mints tokens
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    Direct(DirectSettings),
    Openbridge(OpenbridgeSettings),
}

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Token provider configuration
    pub provider: ProviderSettings,
    /// Default `Amazon-Advertising-API-Scope` value
    pub profile_id: Option<String>,
    /// Region used when neither override nor identity supplies one
    pub default_region: Region,
    /// Route NA traffic to the sandbox host
    pub sandbox: bool,
    /// Tokens closer than this to expiry are refreshed
    pub refresh_margin: Duration,
    /// Timeout applied to every upstream call
    pub http_timeout: Duration,
    /// Read-only endpoint used by identity auto-detection
    pub identity_check_path: String,
    /// Accept broker refresh tokens sent by callers (brokered pathway only)
    pub accept_caller_tokens: bool,
    /// Idle time after which session state and caller pipelines are dropped
    pub session_max_age: Duration,
}

impl Settings {
    pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;
    pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_IDENTITY_CHECK_PATH: &'static str = "/v2/profiles";
    pub const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 3600;

    pub const MAX_REFRESH_MARGIN_SECS: u64 = 86_400;
    pub const MAX_HTTP_TIMEOUT_SECS: u64 = 3600;
    pub const MAX_SESSION_MAX_AGE_SECS: u64 = 7 * 86_400;

    /// Settings with defaults around a provider
    pub fn new(provider: ProviderSettings) -> Self {
        Self {
            provider,
            profile_id: None,
            default_region: Region::Na,
            sandbox: false,
            refresh_margin: Duration::from_secs(Self::DEFAULT_REFRESH_MARGIN_SECS),
            http_timeout: Duration::from_secs(Self::DEFAULT_HTTP_TIMEOUT_SECS),
            identity_check_path: Self::DEFAULT_IDENTITY_CHECK_PATH.to_string(),
            accept_caller_tokens: false,
            session_max_age: Duration::from_secs(Self::DEFAULT_SESSION_MAX_AGE_SECS),
        }
    }

    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let broker_token = get("OPENBRIDGE_REFRESH_TOKEN").or_else(|| get("OPENBRIDGE_API_KEY"));
        let accept_caller_tokens = get("REFRESH_TOKEN_ENABLED").is_some_and(|v| is_truthy(&v));

        let provider = if broker_token.is_some() || accept_caller_tokens {
            let mut openbridge = match broker_token {
                Some(refresh_token) => {
                    debug!("Using Openbridge brokered credentials");
                    OpenbridgeSettings::new(refresh_token)
                }
                None => {
                    debug!("Using Openbridge with caller-supplied refresh tokens only");
                    OpenbridgeSettings::caller_supplied()
                }
            };
            openbridge.remote_identity_id = get("OPENBRIDGE_REMOTE_IDENTITY_ID");
            if let Some(url) = get("OPENBRIDGE_AUTH_BASE_URL") {
                openbridge.auth_base_url = url.trim_end_matches('/').to_string();
            }
            if let Some(url) = get("OPENBRIDGE_IDENTITY_BASE_URL") {
                openbridge.identity_base_url = url.trim_end_matches('/').to_string();
            }
            if let Some(url) = get("OPENBRIDGE_SERVICE_BASE_URL") {
                openbridge.service_base_url = url.trim_end_matches('/').to_string();
            }
            ProviderSettings::Openbridge(openbridge)
        } else {
            let client_id = get("AD_API_CLIENT_ID");
            let client_secret = get("AD_API_CLIENT_SECRET");
            let refresh_token = get("AD_API_REFRESH_TOKEN");

            match (client_id, client_secret, refresh_token) {
                (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                    debug!("Using direct Amazon Ads credentials");
                    ProviderSettings::Direct(DirectSettings {
                        client_id,
                        client_secret: SecretString::new(client_secret),
                        refresh_token: SecretString::new(refresh_token),
                    })
                }
                (None, None, None) => {
                    return Err(AuthError::Config(
                        "no credentials configured: set OPENBRIDGE_REFRESH_TOKEN, \
                         REFRESH_TOKEN_ENABLED or the three AD_API_* direct variables"
                            .to_string(),
                    ))
                }
                (client_id, client_secret, refresh_token) => {
                    let missing: Vec<&str> = [
                        ("AD_API_CLIENT_ID", client_id.is_none()),
                        ("AD_API_CLIENT_SECRET", client_secret.is_none()),
                        ("AD_API_REFRESH_TOKEN", refresh_token.is_none()),
                    ]
                    .into_iter()
                    .filter(|(_, is_missing)| *is_missing)
                    .map(|(name, _)| name)
                    .collect();
                    return Err(AuthError::Config(format!(
                        "incomplete direct credentials, missing {}",
                        missing.join(", ")
                    )));
                }
            }
        };

        let mut settings = Self::new(provider);
        settings.accept_caller_tokens = accept_caller_tokens;
        settings.profile_id = get("AD_API_PROFILE_ID");

        if let Some(region) = get("AMAZON_ADS_REGION") {
            settings.default_region = region.parse()?;
        }
        if let Some(sandbox) = get("AMAZON_ADS_SANDBOX_MODE") {
            settings.sandbox = is_truthy(&sandbox);
        }
        if let Some(margin) = get("AUTH_TOKEN_REFRESH_MARGIN_SECS") {
            let secs = parse_secs(
                "AUTH_TOKEN_REFRESH_MARGIN_SECS",
                &margin,
                0,
                Self::MAX_REFRESH_MARGIN_SECS,
            )?;
            settings.refresh_margin = Duration::from_secs(secs);
        }
        if let Some(timeout) = get("HTTP_TIMEOUT_SECS") {
            let secs = parse_secs("HTTP_TIMEOUT_SECS", &timeout, 1, Self::MAX_HTTP_TIMEOUT_SECS)?;
            settings.http_timeout = Duration::from_secs(secs);
        }
        if let Some(max_age) = get("SESSION_MAX_AGE_SECS") {
            let secs = parse_secs(
                "SESSION_MAX_AGE_SECS",
                &max_age,
                1,
                Self::MAX_SESSION_MAX_AGE_SECS,
            )?;
            settings.session_max_age = Duration::from_secs(secs);
        }
        if let Some(path) = get("AUTH_IDENTITY_CHECK_PATH") {
            settings.identity_check_path = if path.starts_with('/') {
                path
            } else {
                format!("/{}", path)
            };
        }

        Ok(settings)
    }

    /// Identity to activate when none has been selected
    pub fn default_identity_id(&self) -> Option<&str> {
        match &self.provider {
            ProviderSettings::Direct(_) => None,
            ProviderSettings::Openbridge(openbridge) => openbridge.remote_identity_id.as_deref(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Whole seconds within `min..=max`
fn parse_secs(key: &str, value: &str, min: u64, max: u64) -> Result<u64> {
    let secs = value.parse::<u64>().map_err(|_| {
        AuthError::Config(format!(
            "{} must be a whole number of seconds, got {:?}",
            key, value
        ))
    })?;
    if !(min..=max).contains(&secs) {
        return Err(AuthError::Config(format!(
            "{} must be between {} and {} seconds, got {}",
            key, min, max, secs
        )));
    }
    Ok(secs)
}
