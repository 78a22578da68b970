//! Token cache with single-flight refresh
//!
//! One slot per identity holds the last minted [`Credentials`] and, while a
//! mint is running, a shared handle to it. Concurrent callers for the same
//! identity join the running mint instead of starting their own. The mint
//! itself runs on a spawned task that writes its result back into the slot, so
//! a caller being cancelled never cancels the mint other callers are awaiting.
//!
//! Slot lifecycle: `Empty -> Minting -> Valid -> (near expiry) Minting -> Valid`.
//! A failed mint leaves the previous credentials (if any) in place.

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{Credentials, Identity, IdentityKind};
use crate::error::{AuthError, AuthStage, Result};
use crate::provider::CredentialProvider;
use crate::secret::SecretString;

type MintFuture = Shared<BoxFuture<'static, Result<Credentials>>>;

/// Observable state of one identity's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing cached, nothing running
    Empty,
    /// Cached credentials outside the refresh margin
    Valid,
    /// Cached credentials inside the refresh margin, no mint running
    Stale,
    /// A mint is running for this identity
    Minting,
}

#[derive(Default)]
struct Slot {
    current: Option<Credentials>,
    in_flight: Option<MintFuture>,
}

/// Per-identity credentials cache
pub struct TokenCache {
    provider: Arc<dyn CredentialProvider>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    margin: Duration,
    mint_timeout: std::time::Duration,
}

impl TokenCache {
    /// Create a cache in front of a provider
    ///
    /// `margin` is the refresh safety margin; `mint_timeout` bounds each mint
    /// so waiters are always released.
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        margin: Duration,
        mint_timeout: std::time::Duration,
    ) -> Self {
        Self {
            provider,
            slots: Arc::new(Mutex::new(HashMap::new())),
            margin,
            mint_timeout,
        }
    }

    /// Valid credentials for an identity, minting at most once concurrently
    pub async fn get(&self, identity: &Identity) -> Result<Credentials> {
        let flight = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(identity.id.clone()).or_default();

            if let Some(creds) = slot
                .current
                .as_ref()
                .filter(|creds| !creds.needs_refresh(self.margin))
            {
                return Ok(creds.clone());
            }

            match &slot.in_flight {
                Some(flight) => {
                    debug!("Joining in-flight mint for identity {}", identity.id);
                    flight.clone()
                }
                None => {
                    let flight = self.spawn_mint(identity.clone());
                    slot.in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Start a detached mint whose result lands in the identity's slot
    fn spawn_mint(&self, identity: Identity) -> MintFuture {
        let provider = self.provider.clone();
        let slots = self.slots.clone();
        let timeout = self.mint_timeout;
        let stage = match provider.kind() {
            IdentityKind::Direct => AuthStage::OAuthRefresh,
            IdentityKind::Brokered => AuthStage::BrokerToken,
        };

        info!("Minting credentials for identity {}", identity.id);

        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, provider.mint(&identity)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AuthError::Transient {
                    stage,
                    detail: format!("token mint timed out after {}s", timeout.as_secs_f64()),
                }),
            };

            let mut slots = slots.lock().await;
            let slot = slots.entry(identity.id.clone()).or_default();
            slot.in_flight = None;
            match &outcome {
                Ok(creds) => slot.current = Some(creds.clone()),
                Err(e) => warn!("Mint failed for identity {}: {}", identity.id, e),
            }
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(AuthError::Transient {
                    stage,
                    detail: format!("token mint task ended abnormally: {}", e),
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Drop cached credentials if they still hold the rejected token
    ///
    /// Returns whether anything was dropped. A newer token minted by a
    /// concurrent caller is left alone.
    pub async fn invalidate(&self, identity_id: &str, rejected: &SecretString) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(identity_id) {
            Some(slot) if slot.current.as_ref().is_some_and(|c| &c.access_token == rejected) => {
                info!("Invalidated cached token {} for identity {}", rejected.preview(), identity_id);
                slot.current = None;
                true
            }
            _ => false,
        }
    }

    /// Current slot state for an identity
    pub async fn state(&self, identity_id: &str) -> CacheState {
        let slots = self.slots.lock().await;
        match slots.get(identity_id) {
            None => CacheState::Empty,
            Some(slot) if slot.in_flight.is_some() => CacheState::Minting,
            Some(Slot { current: None, .. }) => CacheState::Empty,
            Some(Slot {
                current: Some(creds),
                ..
            }) => {
                if creds.needs_refresh(self.margin) {
                    CacheState::Stale
                } else {
                    CacheState::Valid
                }
            }
        }
    }

    /// Forget every cached credential (running mints still complete)
    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.values_mut() {
            slot.current = None;
        }
    }
}
