//! # ads-core
//!
//! Credential and identity resolution for the Amazon Ads API:
//! - Direct (refresh token) and Openbridge-brokered token providers
//! - Identity registry with session-scoped active identity, region and profile
//! - Per-identity token cache with single-flight refresh
//! - Optional per-caller broker refresh tokens, each with its own pipeline
//! - Region routing across the NA / EU / FE endpoints
//! - Request client that injects auth headers and re-authenticates once on 401

pub mod cache;
pub mod client;
pub mod credential;
pub mod error;
pub mod manager;
mod pipeline;
pub mod provider;
pub mod region;
pub mod registry;
pub mod routing;
pub mod secret;
pub mod settings;

pub use cache::{CacheState, TokenCache};
pub use client::{strip_reserved_headers, AdsClient, AdsRequest, AdsResponse};
pub use credential::{
    Credentials, CredentialsSummary, Identity, IdentityKind, CLIENT_ID_HEADER, SCOPE_HEADER,
};
pub use error::{AuthError, AuthStage, Result};
pub use manager::{AuthManager, RoutingSnapshot};
pub use provider::{CredentialProvider, DirectProvider, OpenbridgeProvider, DIRECT_IDENTITY_ID};
pub use region::{Region, RegionInfo, RegionRouter, Route, RouteSource};
pub use registry::IdentityRegistry;
pub use routing::{RoutingEntry, RoutingState};
pub use secret::{mask, SecretString};
pub use settings::{DirectSettings, OpenbridgeSettings, ProviderSettings, Settings};
