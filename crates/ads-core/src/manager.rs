//! Auth manager
//!
//! Ties the providers, registries, token caches, region router and routing
//! state together behind the operations a host exposes. Every operation takes
//! the caller's session key (`None` for callers without one); see
//! [`crate::routing`] for how sessions share state.
//!
//! Sessions normally run on the server's configured credentials. A session
//! bound to a caller-supplied broker refresh token runs on that caller's own
//! pipeline instead, and the configured default identity and profile do not
//! apply to it.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::CacheState;
use crate::credential::{Credentials, Identity};
use crate::error::{AuthError, Result};
use crate::pipeline::{CallerPipelines, Pipeline};
use crate::provider::{self, build_http_client, CredentialProvider};
use crate::region::{Region, RegionInfo, RegionRouter, Route, RouteSource};
use crate::routing::{RoutingEntry, RoutingState};
use crate::secret::SecretString;
use crate::settings::{ProviderSettings, Settings};

/// Mint timeout as a multiple of the per-request HTTP timeout.
///
/// A brokered mint is up to four sequential requests (JWT, token, and one
/// re-minted pair after a 401).
const MINT_TIMEOUT_FACTOR: u32 = 4;

/// Largest accepted refresh margin
const MAX_REFRESH_MARGIN_HOURS: i64 = 24;

/// Where requests for a session currently go
#[derive(Debug, Clone, Serialize)]
pub struct RoutingSnapshot {
    pub host: String,
    pub region: Region,
    pub region_name: String,
    pub base_url: String,
    pub source: RouteSource,
    pub identity_id: Option<String>,
    pub profile_id: Option<String>,
    pub sandbox: bool,
    /// Whether the session runs on caller-supplied credentials
    pub caller_credentials: bool,
}

/// A session's routing entry together with the pipeline serving it
struct Scope {
    entry: RoutingEntry,
    pipeline: Arc<Pipeline>,
}

impl Scope {
    fn is_caller(&self) -> bool {
        self.entry.caller_key.is_some()
    }
}

/// Credential pipeline entry point
pub struct AuthManager {
    settings: Settings,
    router: RegionRouter,
    server: Arc<Pipeline>,
    callers: Option<CallerPipelines>,
    routing: RoutingState,
}

impl AuthManager {
    /// Build the whole pipeline from settings
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let router = RegionRouter::new(settings.default_region, settings.sandbox);
        let provider = provider::from_settings(&settings, router.clone())?;
        Self::new(provider, router, settings)
    }

    /// Build around an explicit provider and router
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        router: RegionRouter,
        settings: Settings,
    ) -> Result<Self> {
        let margin = chrono::Duration::from_std(settings.refresh_margin)
            .ok()
            .filter(|margin| *margin <= chrono::Duration::hours(MAX_REFRESH_MARGIN_HOURS))
            .ok_or_else(|| {
                AuthError::Config(format!(
                    "refresh margin out of range: {:?}",
                    settings.refresh_margin
                ))
            })?;
        let mint_timeout = settings
            .http_timeout
            .checked_mul(MINT_TIMEOUT_FACTOR)
            .ok_or_else(|| {
                AuthError::Config(format!(
                    "HTTP timeout out of range: {:?}",
                    settings.http_timeout
                ))
            })?;

        let callers = match (&settings.provider, settings.accept_caller_tokens) {
            (ProviderSettings::Openbridge(broker), true) => Some(CallerPipelines::new(
                broker.clone(),
                router.clone(),
                build_http_client(settings.http_timeout)?,
                margin,
                mint_timeout,
                settings.session_max_age,
            )),
            (ProviderSettings::Direct(_), true) => {
                warn!("Caller refresh tokens need the brokered pathway; ignoring them");
                None
            }
            (_, false) => None,
        };

        info!(
            "Auth pipeline ready ({:?} provider, default region {}, margin {}s, caller tokens {})",
            provider.kind(),
            router.default_region(),
            margin.num_seconds(),
            if callers.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            server: Arc::new(Pipeline::new(provider, margin, mint_timeout)),
            callers,
            routing: RoutingState::new(settings.session_max_age),
            router,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &RegionRouter {
        &self.router
    }

    /// Whether callers may supply their own broker refresh token
    pub fn accepts_caller_tokens(&self) -> bool {
        self.callers.is_some()
    }

    /// Run a session on a caller-supplied broker refresh token
    ///
    /// Returns `false` (and changes nothing) when caller tokens are not
    /// accepted.
    pub async fn bind_refresh_token(&self, session: &str, refresh_token: &SecretString) -> bool {
        let Some(callers) = &self.callers else {
            debug!("Ignoring caller refresh token {}", refresh_token.preview());
            return false;
        };
        let key = callers.ensure(refresh_token).await;
        self.routing.bind_caller(session, key).await;
        true
    }

    async fn scope(&self, session: Option<&str>) -> Result<Scope> {
        let entry = self.routing.resolve(session).await;
        let pipeline = match (&entry.caller_key, &self.callers) {
            (Some(key), Some(callers)) => callers.get(key).await.ok_or_else(|| {
                AuthError::Config(
                    "caller credentials for this session expired; send the refresh token again"
                        .to_string(),
                )
            })?,
            _ => self.server.clone(),
        };
        Ok(Scope { entry, pipeline })
    }

    /// Profile configured for the server's own credentials
    fn configured_profile(&self, scope: &Scope) -> Option<String> {
        if scope.is_caller() {
            None
        } else {
            self.settings.profile_id.clone()
        }
    }

    /// List identities visible to the session's credentials
    pub async fn list_identities(&self, session: Option<&str>) -> Result<Vec<Identity>> {
        self.scope(session).await?.pipeline.registry.list().await
    }

    /// Select the active identity for a session
    ///
    /// The id must come from the last listing. If nothing has been listed yet
    /// the registry lists once first.
    pub async fn set_active_identity(
        &self,
        session: Option<&str>,
        identity_id: &str,
    ) -> Result<Identity> {
        let scope = self.scope(session).await?;
        let registry = &scope.pipeline.registry;
        if !registry.is_listed().await {
            registry.list().await?;
        }
        let identity = registry.find(identity_id).await?;
        self.routing
            .set_identity(session, Some(identity.id.clone()))
            .await;
        info!("Active identity set to {}", identity.id);
        Ok(identity)
    }

    /// Currently active identity
    ///
    /// Falls back to the configured default identity, then to the only
    /// listed identity when exactly one exists.
    pub async fn get_active_identity(&self, session: Option<&str>) -> Result<Identity> {
        let scope = self.scope(session).await?;
        self.active_identity(&scope).await
    }

    async fn active_identity(&self, scope: &Scope) -> Result<Identity> {
        let registry = &scope.pipeline.registry;
        if let Some(identity_id) = &scope.entry.identity_id {
            registry.known().await?;
            return registry.find(identity_id).await;
        }

        let known = registry.known().await?;
        if let Some(default_id) = self.settings.default_identity_id().filter(|_| !scope.is_caller())
        {
            return known
                .into_iter()
                .find(|i| i.id == default_id)
                .ok_or_else(|| AuthError::IdentityNotFound(default_id.to_string()));
        }

        match known.as_slice() {
            [only] => {
                debug!("Inferred active identity {}", only.id);
                Ok(only.clone())
            }
            _ => Err(AuthError::NoActiveIdentity),
        }
    }

    /// Credentials for the active identity, routed and scoped for the session
    pub async fn get_active_credentials(&self, session: Option<&str>) -> Result<Credentials> {
        self.active_credentials(session, None).await
    }

    /// Like [`get_active_credentials`](Self::get_active_credentials), with a
    /// per-call profile that wins over the session's and the configured one
    pub async fn active_credentials(
        &self,
        session: Option<&str>,
        profile_id: Option<&str>,
    ) -> Result<Credentials> {
        let identity = self.get_active_identity(session).await?;
        self.credentials_for(session, &identity, profile_id).await
    }

    /// Credentials for a specific identity under the session's routing
    pub async fn credentials_for(
        &self,
        session: Option<&str>,
        identity: &Identity,
        profile_id: Option<&str>,
    ) -> Result<Credentials> {
        let scope = self.scope(session).await?;
        let profile = profile_id
            .map(str::to_string)
            .or_else(|| scope.entry.profile_id.clone())
            .or_else(|| self.configured_profile(&scope));
        self.routed(&scope, identity, profile.as_deref()).await
    }

    /// Credentials routed for the session but carrying no profile scope
    pub async fn unscoped_credentials_for(
        &self,
        session: Option<&str>,
        identity: &Identity,
    ) -> Result<Credentials> {
        let scope = self.scope(session).await?;
        self.routed(&scope, identity, None).await
    }

    async fn routed(
        &self,
        scope: &Scope,
        identity: &Identity,
        profile_id: Option<&str>,
    ) -> Result<Credentials> {
        let creds = scope.pipeline.cache.get(identity).await?;
        let route = self
            .router
            .resolve(Some(identity), scope.entry.region_override);
        Ok(creds.routed(&route).scoped(profile_id))
    }

    /// Route requests for the session to a region regardless of identity
    pub async fn set_region_override(&self, session: Option<&str>, region: Region) {
        self.routing.set_region_override(session, Some(region)).await;
        info!("Region override set to {}", region);
    }

    /// Revert to identity / default region resolution
    pub async fn clear_region_override(&self, session: Option<&str>) {
        self.routing.set_region_override(session, None).await;
        info!("Region override cleared");
    }

    /// Host, region and selections in effect for a session
    pub async fn show_routing_state(&self, session: Option<&str>) -> Result<RoutingSnapshot> {
        let scope = self.scope(session).await?;
        let identity = match self.active_identity(&scope).await {
            Ok(identity) => Some(identity),
            Err(AuthError::NoActiveIdentity) => None,
            Err(e) => return Err(e),
        };
        let route: Route = self
            .router
            .resolve(identity.as_ref(), scope.entry.region_override);

        Ok(RoutingSnapshot {
            host: route.host(),
            region: route.region,
            region_name: self.router.info(route.region).name.clone(),
            base_url: route.base_url,
            source: route.source,
            identity_id: identity.map(|i| i.id),
            profile_id: scope
                .entry
                .profile_id
                .clone()
                .or_else(|| self.configured_profile(&scope)),
            sandbox: self.settings.sandbox,
            caller_credentials: scope.is_caller(),
        })
    }

    pub fn list_regions(&self) -> Vec<RegionInfo> {
        self.router.list()
    }

    /// Scope the session's requests to an advertising profile
    pub async fn set_active_profile(&self, session: Option<&str>, profile_id: &str) {
        self.routing
            .set_profile(session, Some(profile_id.to_string()))
            .await;
        info!("Active profile set to {}", profile_id);
    }

    pub async fn clear_active_profile(&self, session: Option<&str>) {
        self.routing.set_profile(session, None).await;
    }

    /// Drop cached credentials holding a rejected token
    pub async fn invalidate(
        &self,
        session: Option<&str>,
        identity_id: &str,
        rejected: &SecretString,
    ) -> Result<bool> {
        let scope = self.scope(session).await?;
        Ok(scope.pipeline.cache.invalidate(identity_id, rejected).await)
    }

    pub async fn cache_state(&self, session: Option<&str>, identity_id: &str) -> Result<CacheState> {
        let scope = self.scope(session).await?;
        Ok(scope.pipeline.cache.state(identity_id).await)
    }

    /// Forget a session's routing selections
    pub async fn end_session(&self, session: &str) {
        self.routing.end_session(session).await;
    }

    /// Forget identities, routing selections, cached credentials and caller
    /// pipelines
    pub async fn reset(&self) {
        self.server.reset().await;
        self.routing.reset().await;
        if let Some(callers) = &self.callers {
            callers.clear().await;
        }
        info!("Auth state reset");
    }
}
