//! Identity registry
//!
//! Remembers the identities returned by the last provider listing. Selecting
//! an identity is only allowed for ids from that listing.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::credential::Identity;
use crate::error::{AuthError, Result};
use crate::provider::CredentialProvider;

/// Known identities for the configured provider
pub struct IdentityRegistry {
    provider: Arc<dyn CredentialProvider>,
    known: RwLock<Option<Vec<Identity>>>,
}

impl IdentityRegistry {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            known: RwLock::new(None),
        }
    }

    /// Query the provider and remember the result
    pub async fn list(&self) -> Result<Vec<Identity>> {
        let identities = self.provider.list_identities().await?;
        info!("Registry holds {} identities", identities.len());
        *self.known.write().await = Some(identities.clone());
        Ok(identities)
    }

    /// Identities from the last listing, listing once if never listed
    pub async fn known(&self) -> Result<Vec<Identity>> {
        if let Some(identities) = self.known.read().await.as_ref() {
            return Ok(identities.clone());
        }
        self.list().await
    }

    /// Identity from the last listing
    pub async fn find(&self, identity_id: &str) -> Result<Identity> {
        self.known
            .read()
            .await
            .as_ref()
            .and_then(|known| known.iter().find(|i| i.id == identity_id).cloned())
            .ok_or_else(|| AuthError::IdentityNotFound(identity_id.to_string()))
    }

    /// Whether a listing has happened since construction or the last reset
    pub async fn is_listed(&self) -> bool {
        self.known.read().await.is_some()
    }

    pub async fn reset(&self) {
        *self.known.write().await = None;
    }
}
