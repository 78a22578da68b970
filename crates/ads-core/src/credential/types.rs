//! Identity and credential type definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::region::{Region, Route};
use crate::secret::{mask, SecretString};

/// Client id header sent on every Amazon Ads API call
pub const CLIENT_ID_HEADER: &str = "Amazon-Advertising-API-ClientId";

/// Profile scope header
pub const SCOPE_HEADER: &str = "Amazon-Advertising-API-Scope";

/// Headers the request client owns; caller-supplied values are discarded
pub const RESERVED_HEADERS: [&str; 3] = [
    "authorization",
    "amazon-advertising-api-clientid",
    "amazon-advertising-api-scope",
];

/// Authentication pathway an identity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Refresh token + client id/secret exchanged directly with Amazon
    Direct,
    /// Token brokered by Openbridge
    Brokered,
}

/// One selectable set of credentials / linked account (no secrets)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque id, unique per provider
    pub id: String,

    /// Pathway discriminator
    #[serde(rename = "type")]
    pub kind: IdentityKind,

    /// Provider metadata (display name, region, ...)
    pub attributes: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute insert
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Display name, if the provider supplied one
    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }

    /// Home region from the `region` attribute, when it parses
    pub fn home_region(&self) -> Option<Region> {
        self.attributes.get("region").and_then(|r| r.parse().ok())
    }
}

/// Minted, time-bounded capability to call the API for one identity
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Identity these credentials were minted for
    pub identity_id: String,

    /// Bearer token - never log in full
    pub access_token: SecretString,

    /// Absolute expiry
    pub expires_at: DateTime<Utc>,

    /// Region of `base_url`
    pub region: Region,

    /// Resolved API endpoint
    pub base_url: String,

    /// Precomputed headers excluding Authorization
    pub headers: BTreeMap<String, String>,
}

impl Credentials {
    /// Whether the token is inside the refresh margin (or already expired)
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        Utc::now()
            .checked_add_signed(margin)
            .map_or(true, |deadline| deadline >= self.expires_at)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.headers.get(CLIENT_ID_HEADER).map(String::as_str)
    }

    /// Copy re-pointed at a different route (region override)
    pub fn routed(&self, route: &Route) -> Self {
        let mut routed = self.clone();
        routed.region = route.region;
        routed.base_url = route.base_url.clone();
        routed
    }

    /// Copy with the profile scope header set or removed
    pub fn scoped(&self, profile_id: Option<&str>) -> Self {
        let mut scoped = self.clone();
        match profile_id {
            Some(profile_id) => {
                scoped
                    .headers
                    .insert(SCOPE_HEADER.to_string(), profile_id.to_string());
            }
            None => {
                scoped.headers.remove(SCOPE_HEADER);
            }
        }
        scoped
    }

    /// Display-safe view
    pub fn summary(&self) -> CredentialsSummary {
        CredentialsSummary {
            identity_id: self.identity_id.clone(),
            access_token_preview: self.access_token.preview(),
            expires_at: self.expires_at,
            region: self.region,
            base_url: self.base_url.clone(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| {
                    let shown = if name == SCOPE_HEADER {
                        value.clone()
                    } else {
                        mask(value)
                    };
                    (name.clone(), shown)
                })
                .collect(),
        }
    }
}

/// Serializable credentials view with the token masked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsSummary {
    pub identity_id: String,
    pub access_token_preview: String,
    pub expires_at: DateTime<Utc>,
    pub region: Region,
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
}
