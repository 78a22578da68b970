//! Credential pipelines
//!
//! A pipeline is one provider with its own identity registry and token cache.
//! The server's configured credentials get one. When callers may bring their
//! own broker refresh token, each distinct token gets another, keyed by the
//! token's fingerprint so the token itself is never stored as a map key or
//! logged. Caller pipelines that go unused for longer than the idle limit are
//! dropped together with their broker JWT and cached tokens.

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::TokenCache;
use crate::provider::{CredentialProvider, OpenbridgeProvider};
use crate::region::RegionRouter;
use crate::registry::IdentityRegistry;
use crate::secret::SecretString;
use crate::settings::OpenbridgeSettings;

/// Registry and cache in front of one provider
pub(crate) struct Pipeline {
    pub registry: IdentityRegistry,
    pub cache: TokenCache,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        margin: chrono::Duration,
        mint_timeout: Duration,
    ) -> Self {
        Self {
            registry: IdentityRegistry::new(provider.clone()),
            cache: TokenCache::new(provider, margin, mint_timeout),
        }
    }

    pub async fn reset(&self) {
        self.registry.reset().await;
        self.cache.clear().await;
    }
}

struct CallerSlot {
    pipeline: Arc<Pipeline>,
    last_used: Instant,
}

/// Brokered pipelines for caller-supplied refresh tokens
pub(crate) struct CallerPipelines {
    broker: OpenbridgeSettings,
    router: RegionRouter,
    http: Client,
    margin: chrono::Duration,
    mint_timeout: Duration,
    max_idle: Duration,
    slots: Mutex<HashMap<String, CallerSlot>>,
}

impl CallerPipelines {
    pub fn new(
        broker: OpenbridgeSettings,
        router: RegionRouter,
        http: Client,
        margin: chrono::Duration,
        mint_timeout: Duration,
        max_idle: Duration,
    ) -> Self {
        Self {
            broker,
            router,
            http,
            margin,
            mint_timeout,
            max_idle,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Key of the pipeline for a refresh token, creating it on first use
    pub async fn ensure(&self, refresh_token: &SecretString) -> String {
        let key = refresh_token.fingerprint();
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        self.expire(&mut slots, now);

        let slot = slots.entry(key.clone()).or_insert_with(|| {
            info!(
                "Creating pipeline for caller refresh token {} ({})",
                refresh_token.preview(),
                key
            );
            let provider = OpenbridgeProvider::new(
                self.broker.with_refresh_token(refresh_token.clone()),
                self.router.clone(),
                self.http.clone(),
            );
            CallerSlot {
                pipeline: Arc::new(Pipeline::new(
                    Arc::new(provider),
                    self.margin,
                    self.mint_timeout,
                )),
                last_used: now,
            }
        });
        slot.last_used = now;
        key
    }

    /// Live pipeline for a key
    pub async fn get(&self, key: &str) -> Option<Arc<Pipeline>> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        self.expire(&mut slots, now);

        slots.get_mut(key).map(|slot| {
            slot.last_used = now;
            slot.pipeline.clone()
        })
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }

    fn expire(&self, slots: &mut HashMap<String, CallerSlot>, now: Instant) {
        slots.retain(|key, slot| {
            let live = now.duration_since(slot.last_used) < self.max_idle;
            if !live {
                debug!("Dropping idle caller pipeline {}", key);
            }
            live
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callers(max_idle: Duration) -> CallerPipelines {
        CallerPipelines::new(
            OpenbridgeSettings::caller_supplied(),
            RegionRouter::default(),
            Client::new(),
            chrono::Duration::seconds(60),
            Duration::from_secs(5),
            max_idle,
        )
    }

    #[tokio::test]
    async fn test_one_pipeline_per_token() {
        let callers = callers(Duration::from_secs(60));
        let first = SecretString::new("client-a:refresh-token-value");
        let second = SecretString::new("client-b:refresh-token-value");

        let key = callers.ensure(&first).await;
        assert_eq!(callers.ensure(&first).await, key);
        assert_ne!(callers.ensure(&second).await, key);
        assert_eq!(callers.len().await, 2);

        let a = callers.get(&key).await.unwrap();
        let b = callers.get(&key).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!key.contains("client-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_pipelines_are_dropped() {
        let callers = callers(Duration::from_secs(60));
        let idle = callers
            .ensure(&SecretString::new("client-a:refresh-token-value"))
            .await;
        let busy = callers
            .ensure(&SecretString::new("client-b:refresh-token-value"))
            .await;

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(callers.get(&busy).await.is_some());

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(callers.get(&idle).await.is_none());
        assert!(callers.get(&busy).await.is_some());
        assert_eq!(callers.len().await, 1);
    }
}
