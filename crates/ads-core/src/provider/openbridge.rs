//! Brokered pathway: Openbridge remote identities
//!
//! Flow: broker refresh token -> short-lived broker JWT -> list remote
//! identities -> per-identity Amazon Ads token + client id. The broker JWT is
//! cached until shortly before its `expires_at` claim. A 401 from any broker
//! endpoint drops the cached JWT, mints a new one and retries that call once.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{expiry_from, read_body, Attempt, CredentialProvider};
use crate::credential::{Credentials, Identity, IdentityKind, CLIENT_ID_HEADER};
use crate::error::{AuthError, AuthStage, Result};
use crate::region::RegionRouter;
use crate::secret::SecretString;
use crate::settings::OpenbridgeSettings;

/// Openbridge remote identity type id for Amazon Ads
pub const AMAZON_ADS_IDENTITY_TYPE: &str = "17";

/// Label used in errors for failures before an identity is involved
const BROKER_LABEL: &str = "openbridge";

/// JWT lifetime assumed when the token carries no expiry claim (50 minutes)
const JWT_FALLBACK_TTL_SECS: i64 = 3000;

/// Re-mint the broker JWT this long before it expires
const JWT_EXPIRY_MARGIN_SECS: i64 = 60;

const JSON_API: &str = "application/vnd.api+json";

#[derive(Clone)]
struct BrokerJwt {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl BrokerJwt {
    fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(JWT_EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Mints Amazon Ads tokens through Openbridge
pub struct OpenbridgeProvider {
    settings: OpenbridgeSettings,
    router: RegionRouter,
    http: Client,
    /// Held across the exchange so concurrent callers share one JWT mint
    jwt: Mutex<Option<BrokerJwt>>,
}

impl OpenbridgeProvider {
    pub fn new(settings: OpenbridgeSettings, router: RegionRouter, http: Client) -> Self {
        Self {
            settings,
            router,
            http,
            jwt: Mutex::new(None),
        }
    }

    /// Current broker JWT, exchanging the refresh token when needed
    async fn jwt(&self) -> Result<SecretString> {
        let mut cached = self.jwt.lock().await;
        if let Some(jwt) = cached.as_ref().filter(|jwt| jwt.is_fresh()) {
            return Ok(jwt.token.clone());
        }

        let fresh = self.exchange_refresh_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Forget the cached JWT if it is still the one that was rejected
    async fn invalidate_jwt(&self, rejected: &SecretString) {
        let mut cached = self.jwt.lock().await;
        if cached.as_ref().is_some_and(|jwt| &jwt.token == rejected) {
            debug!("Dropping rejected broker JWT {}", rejected.preview());
            *cached = None;
        }
    }

    async fn exchange_refresh_token(&self) -> Result<BrokerJwt> {
        let refresh_token = self.settings.refresh_token.as_ref().ok_or_else(|| {
            AuthError::Config(
                "no broker refresh token: send one as an Authorization bearer token".to_string(),
            )
        })?;
        let url = format!("{}/auth/api/ref", self.settings.auth_base_url);
        debug!(
            "Exchanging broker refresh token {} for JWT",
            refresh_token.preview()
        );

        let payload = json!({
            "data": {
                "type": "APIAuth",
                "attributes": { "refresh_token": refresh_token.expose() }
            }
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AuthError::from_transport(AuthStage::BrokerJwt, &e))?;

        let status = response.status();
        let body = read_body(AuthStage::BrokerJwt, response).await?;
        if !status.is_success() {
            warn!("Broker JWT exchange failed with HTTP {}", status);
            return Err(AuthError::from_status(
                BROKER_LABEL,
                AuthStage::BrokerJwt,
                status,
                &body,
            ));
        }

        let parsed: Value = parse_json(AuthStage::BrokerJwt, &body)?;
        let token = parsed
            .pointer("/data/attributes/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse {
                stage: AuthStage::BrokerJwt,
                detail: "response has no data.attributes.token".to_string(),
            })?;

        let expires_at = jwt_expiry(token)
            .unwrap_or_else(|| Utc::now() + Duration::seconds(JWT_FALLBACK_TTL_SECS));
        info!("Obtained broker JWT (expires {})", expires_at);

        Ok(BrokerJwt {
            token: SecretString::new(token),
            expires_at,
        })
    }

    /// GET a broker resource with the JWT, re-minting it once on 401
    async fn broker_get(&self, stage: AuthStage, label: &str, url: &str) -> Result<Value> {
        let mut attempt = Attempt::First;
        loop {
            let jwt = self.jwt().await?;
            let response = self
                .http
                .get(url)
                .bearer_auth(jwt.expose())
                .header(header::ACCEPT, JSON_API)
                .send()
                .await
                .map_err(|e| AuthError::from_transport(stage, &e))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && attempt == Attempt::First {
                info!("Broker JWT rejected during {}, re-minting", stage);
                self.invalidate_jwt(&jwt).await;
                attempt = Attempt::Retry;
                continue;
            }

            let body = read_body(stage, response).await?;
            if !status.is_success() {
                warn!("Broker call failed during {} with HTTP {}", stage, status);
                return Err(AuthError::from_status(label, stage, status, &body));
            }
            return parse_json(stage, &body);
        }
    }
}

#[async_trait]
impl CredentialProvider for OpenbridgeProvider {
    fn kind(&self) -> IdentityKind {
        IdentityKind::Brokered
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        let url = format!("{}/ri", self.settings.identity_base_url);
        let listing = self
            .broker_get(AuthStage::BrokerIdentities, BROKER_LABEL, &url)
            .await?;

        let entries = listing
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| AuthError::InvalidResponse {
                stage: AuthStage::BrokerIdentities,
                detail: "response has no data array".to_string(),
            })?;

        let identities: Vec<Identity> = entries
            .iter()
            .filter(|entry| {
                entry
                    .pointer("/relationships/remote_identity_type/data/id")
                    .and_then(scalar_to_string)
                    .as_deref()
                    == Some(AMAZON_ADS_IDENTITY_TYPE)
            })
            .filter_map(identity_from_entry)
            .collect();

        info!(
            "Broker returned {} identities, {} are Amazon Ads",
            entries.len(),
            identities.len()
        );
        Ok(identities)
    }

    async fn mint(&self, identity: &Identity) -> Result<Credentials> {
        let url = format!(
            "{}/service/amzadv/token/{}",
            self.settings.service_base_url, identity.id
        );
        let reply = self
            .broker_get(AuthStage::BrokerToken, &identity.id, &url)
            .await?;

        let access_token = token_field(&reply, "access_token").ok_or_else(|| {
            AuthError::InvalidResponse {
                stage: AuthStage::BrokerToken,
                detail: format!("no access_token for identity {}", identity.id),
            }
        })?;
        let client_id = token_field(&reply, "client_id").ok_or_else(|| {
            AuthError::InvalidResponse {
                stage: AuthStage::BrokerToken,
                detail: format!("no client_id for identity {}", identity.id),
            }
        })?;
        let expires_in = token_field(&reply, "expires_in").and_then(|v| v.parse::<i64>().ok());

        let route = self.router.resolve(Some(identity), None);
        let mut headers = BTreeMap::new();
        headers.insert(CLIENT_ID_HEADER.to_string(), client_id);

        let credentials = Credentials {
            identity_id: identity.id.clone(),
            access_token: SecretString::new(access_token),
            expires_at: expiry_from(expires_in),
            region: route.region,
            base_url: route.base_url,
            headers,
        };

        info!(
            "Minted brokered access token {} for identity {} (expires {})",
            credentials.access_token.preview(),
            identity.id,
            credentials.expires_at
        );
        Ok(credentials)
    }
}

fn parse_json(stage: AuthStage, body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| AuthError::InvalidResponse {
        stage,
        detail: format!("unparseable JSON: {}", e),
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// JSON:API identity entry -> Identity, keeping only non-secret scalars
fn identity_from_entry(entry: &Value) -> Option<Identity> {
    let id = entry.get("id").and_then(scalar_to_string)?;
    let mut identity = Identity::new(id, IdentityKind::Brokered);

    if let Some(attributes) = entry.get("attributes").and_then(Value::as_object) {
        for (key, value) in attributes {
            let lowered = key.to_ascii_lowercase();
            if ["token", "secret", "password", "key"]
                .iter()
                .any(|marker| lowered.contains(marker))
            {
                continue;
            }
            if let Some(value) = scalar_to_string(value) {
                identity.attributes.insert(key.clone(), value);
            }
        }
    }
    Some(identity)
}

/// Token replies come as `data.attributes.*`, `data.*` or top-level fields
fn token_field(reply: &Value, field: &str) -> Option<String> {
    [
        format!("/data/attributes/{}", field),
        format!("/data/{}", field),
        format!("/{}", field),
    ]
    .iter()
    .find_map(|pointer| reply.pointer(pointer).and_then(scalar_to_string))
    .filter(|v| !v.is_empty())
}

/// Expiry from the JWT payload, read without signature verification
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    let seconds = ["expires_at", "exp"].iter().find_map(|claim| {
        let value = claims.get(*claim)?;
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse::<f64>().ok()))
    })?;
    Utc.timestamp_opt(seconds as i64, 0).single()
}
