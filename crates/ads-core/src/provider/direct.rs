//! Direct pathway: refresh-token grant against Login with Amazon

use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{expiry_from, read_body, CredentialProvider, TokenResponse};
use crate::credential::{Credentials, Identity, IdentityKind, CLIENT_ID_HEADER};
use crate::error::{AuthError, AuthStage, Result};
use crate::region::RegionRouter;
use crate::secret::{mask, SecretString};
use crate::settings::DirectSettings;

/// Id of the single synthetic identity served by [`DirectProvider`]
pub const DIRECT_IDENTITY_ID: &str = "direct-auth";

/// Exchanges a long-lived refresh token for access tokens
pub struct DirectProvider {
    client_id: String,
    client_secret: SecretString,
    /// Replaced when Amazon rotates the refresh token
    refresh_token: RwLock<SecretString>,
    router: RegionRouter,
    http: Client,
}

impl DirectProvider {
    pub fn new(settings: DirectSettings, router: RegionRouter, http: Client) -> Self {
        Self {
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            refresh_token: RwLock::new(settings.refresh_token),
            router,
            http,
        }
    }

    fn identity(&self) -> Identity {
        Identity::new(DIRECT_IDENTITY_ID, IdentityKind::Direct)
            .with_attribute("name", "Direct Amazon Ads credentials")
            .with_attribute("client_id", mask(&self.client_id))
    }
}

#[async_trait]
impl CredentialProvider for DirectProvider {
    fn kind(&self) -> IdentityKind {
        IdentityKind::Direct
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        Ok(vec![self.identity()])
    }

    async fn mint(&self, identity: &Identity) -> Result<Credentials> {
        if identity.id != DIRECT_IDENTITY_ID {
            return Err(AuthError::IdentityNotFound(identity.id.clone()));
        }

        let token_url = self.router.oauth_endpoint(identity).to_string();
        let refresh_token = self.refresh_token.read().await.clone();

        debug!(
            "Refreshing direct token at {} (refresh token {})",
            token_url,
            refresh_token.preview()
        );

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
            ("refresh_token", refresh_token.expose()),
        ];

        let response = self
            .http
            .post(&token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::from_transport(AuthStage::OAuthRefresh, &e))?;

        let status = response.status();
        let body = read_body(AuthStage::OAuthRefresh, response).await?;

        if !status.is_success() {
            warn!("Direct token refresh failed with HTTP {}", status);
            return Err(AuthError::from_status(
                &identity.id,
                AuthStage::OAuthRefresh,
                status,
                &body,
            ));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse {
                stage: AuthStage::OAuthRefresh,
                detail: format!("unparseable token response: {}", e),
            })?;

        if let Some(rotated) = token.refresh_token.filter(|t| t != refresh_token.expose()) {
            info!("Refresh token rotated by Amazon ({})", mask(&rotated));
            *self.refresh_token.write().await = SecretString::new(rotated);
        }

        let route = self.router.resolve(Some(identity), None);
        let mut headers = BTreeMap::new();
        headers.insert(CLIENT_ID_HEADER.to_string(), self.client_id.clone());

        let credentials = Credentials {
            identity_id: identity.id.clone(),
            access_token: SecretString::new(token.access_token),
            expires_at: expiry_from(token.expires_in),
            region: route.region,
            base_url: route.base_url,
            headers,
        };

        info!(
            "Minted direct access token {} (expires {})",
            credentials.access_token.preview(),
            credentials.expires_at
        );
        Ok(credentials)
    }
}
