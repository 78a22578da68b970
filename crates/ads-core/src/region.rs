//! Region table and endpoint routing
//!
//! The Amazon Ads API is served from three regional hosts. Each region also has
//! its own Login with Amazon token endpoint. Resolution precedence is:
//! explicit override, then the identity's home region, then the configured
//! default region.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::credential::Identity;
use crate::error::AuthError;

/// Sandbox host (NA only)
const SANDBOX_API_ENDPOINT: &str = "https://advertising-api-test.amazon.com";

/// Amazon Ads region code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// North America
    #[default]
    Na,
    /// Europe
    Eu,
    /// Far East
    Fe,
}

impl Region {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Na => "na",
            Self::Eu => "eu",
            Self::Fe => "fe",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "na" => Ok(Self::Na),
            "eu" => Ok(Self::Eu),
            "fe" => Ok(Self::Fe),
            _ => Err(AuthError::UnknownRegion(s.to_string())),
        }
    }
}

/// Static endpoint information for one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region: Region,
    pub name: String,
    pub api_endpoint: String,
    pub oauth_endpoint: String,
}

impl RegionInfo {
    pub fn new(region: Region, name: &str, api_endpoint: &str, oauth_endpoint: &str) -> Self {
        Self {
            region,
            name: name.to_string(),
            api_endpoint: api_endpoint.to_string(),
            oauth_endpoint: oauth_endpoint.to_string(),
        }
    }
}

/// Where a resolved region came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Override,
    Identity,
    Default,
}

/// A resolved endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub region: Region,
    pub base_url: String,
    pub source: RouteSource,
}

impl Route {
    /// Host portion of the base URL (e.g. "advertising-api-eu.amazon.com")
    pub fn host(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| {
                u.host_str().map(|h| match u.port() {
                    Some(port) => format!("{}:{}", h, port),
                    None => h.to_string(),
                })
            })
            .unwrap_or_else(|| self.base_url.clone())
    }
}

/// Region -> endpoint router
///
/// Immutable after construction; the per-session override lives in
/// [`crate::routing::RoutingState`] and is passed in explicitly.
#[derive(Debug, Clone)]
pub struct RegionRouter {
    table: BTreeMap<Region, RegionInfo>,
    default_region: Region,
}

impl RegionRouter {
    /// Router over the production Amazon Ads endpoints
    pub fn new(default_region: Region, sandbox: bool) -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            Region::Na,
            RegionInfo::new(
                Region::Na,
                "North America",
                if sandbox {
                    SANDBOX_API_ENDPOINT
                } else {
                    "https://advertising-api.amazon.com"
                },
                "https://api.amazon.com/auth/o2/token",
            ),
        );
        table.insert(
            Region::Eu,
            RegionInfo::new(
                Region::Eu,
                "Europe",
                "https://advertising-api-eu.amazon.com",
                "https://api.amazon.co.uk/auth/o2/token",
            ),
        );
        table.insert(
            Region::Fe,
            RegionInfo::new(
                Region::Fe,
                "Far East",
                "https://advertising-api-fe.amazon.com",
                "https://api.amazon.co.jp/auth/o2/token",
            ),
        );

        Self {
            table,
            default_region,
        }
    }

    /// Router over a custom table (test servers, proxies).
    ///
    /// Regions missing from `entries` keep their production endpoints.
    pub fn with_endpoints(default_region: Region, entries: Vec<RegionInfo>) -> Self {
        let mut router = Self::new(default_region, false);
        for info in entries {
            router.table.insert(info.region, info);
        }
        router
    }

    pub fn default_region(&self) -> Region {
        self.default_region
    }

    /// Endpoint info for a region
    pub fn info(&self, region: Region) -> &RegionInfo {
        // table is populated for every Region variant in new()
        &self.table[&region]
    }

    /// All regions, in code order
    pub fn list(&self) -> Vec<RegionInfo> {
        self.table.values().cloned().collect()
    }

    /// Resolve the base URL for an identity, honouring an override
    pub fn resolve(&self, identity: Option<&Identity>, override_region: Option<Region>) -> Route {
        let (region, source) = match (override_region, identity.and_then(|i| i.home_region())) {
            (Some(region), _) => (region, RouteSource::Override),
            (None, Some(region)) => (region, RouteSource::Identity),
            (None, None) => (self.default_region, RouteSource::Default),
        };

        Route {
            region,
            base_url: self.info(region).api_endpoint.clone(),
            source,
        }
    }

    /// Token endpoint for an identity's home region
    pub fn oauth_endpoint(&self, identity: &Identity) -> &str {
        let region = identity.home_region().unwrap_or(self.default_region);
        &self.info(region).oauth_endpoint
    }
}

impl Default for RegionRouter {
    fn default() -> Self {
        Self::new(Region::Na, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::IdentityKind;

    #[test]
    fn test_parse_region_codes() {
        assert_eq!("NA".parse::<Region>().unwrap(), Region::Na);
        assert_eq!(" eu ".parse::<Region>().unwrap(), Region::Eu);
        assert_eq!("fe".parse::<Region>().unwrap(), Region::Fe);
        assert!(matches!(
            "us".parse::<Region>(),
            Err(AuthError::UnknownRegion(_))
        ));
    }

    #[test]
    fn test_override_wins_over_identity_region() {
        let router = RegionRouter::default();
        let identity = Identity::new("1", IdentityKind::Brokered).with_attribute("region", "fe");

        let route = router.resolve(Some(&identity), Some(Region::Eu));
        assert_eq!(route.region, Region::Eu);
        assert_eq!(route.source, RouteSource::Override);
        assert!(route.host().contains("-eu"));

        let route = router.resolve(Some(&identity), None);
        assert_eq!(route.region, Region::Fe);
        assert_eq!(route.source, RouteSource::Identity);
        assert_eq!(route.host(), "advertising-api-fe.amazon.com");
    }

    #[test]
    fn test_falls_back_to_default_region() {
        let router = RegionRouter::new(Region::Eu, false);
        let identity = Identity::new("direct-auth", IdentityKind::Direct);

        let route = router.resolve(Some(&identity), None);
        assert_eq!(route.region, Region::Eu);
        assert_eq!(route.source, RouteSource::Default);

        let route = RegionRouter::default().resolve(None, None);
        assert_eq!(route.base_url, "https://advertising-api.amazon.com");
    }

    #[test]
    fn test_resolution_is_pure() {
        let router = RegionRouter::default();
        let identity = Identity::new("1", IdentityKind::Brokered).with_attribute("region", "eu");
        let first = router.resolve(Some(&identity), None);
        let second = router.resolve(Some(&identity), None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_sandbox_only_changes_na_api_host() {
        let router = RegionRouter::new(Region::Na, true);
        assert_eq!(
            router.info(Region::Na).api_endpoint,
            "https://advertising-api-test.amazon.com"
        );
        assert_eq!(
            router.info(Region::Eu).api_endpoint,
            "https://advertising-api-eu.amazon.com"
        );
        assert_eq!(
            router.info(Region::Na).oauth_endpoint,
            "https://api.amazon.com/auth/o2/token"
        );
    }

    #[test]
    fn test_oauth_endpoint_follows_home_region() {
        let router = RegionRouter::default();
        let identity = Identity::new("x", IdentityKind::Direct).with_attribute("region", "fe");
        assert_eq!(
            router.oauth_endpoint(&identity),
            "https://api.amazon.co.jp/auth/o2/token"
        );
    }

    #[test]
    fn test_custom_endpoints_keep_port_in_host() {
        let router = RegionRouter::with_endpoints(
            Region::Na,
            vec![RegionInfo::new(
                Region::Na,
                "Local",
                "http://127.0.0.1:8080",
                "http://127.0.0.1:8080/auth/o2/token",
            )],
        );
        let route = router.resolve(None, None);
        assert_eq!(route.host(), "127.0.0.1:8080");
        assert_eq!(router.list().len(), 3);
    }
}
