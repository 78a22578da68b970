//! Authenticated Amazon Ads API client
//!
//! Resolves credentials for the caller's session, injects the auth headers
//! and sends the request. Caller-supplied values for the reserved headers are
//! discarded before injection. A 401 invalidates the cached token and the
//! request is sent once more with a fresh one; a second 401 is an error.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credential::{Credentials, Identity, RESERVED_HEADERS};
use crate::error::{truncate_body, AuthError, AuthStage, Result};
use crate::manager::AuthManager;
use crate::provider::{build_http_client, read_body, Attempt};
use crate::region::Region;

/// One call to the Amazon Ads API, relative to the routed host
#[derive(Debug, Clone)]
pub struct AdsRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Scope for this call only
    pub profile_id: Option<String>,
}

impl AdsRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            profile_id: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }
}

/// Upstream reply (any status other than 401 and 5xx)
#[derive(Debug, Clone, Serialize)]
pub struct AdsResponse {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub request_id: Option<String>,
    pub identity_id: String,
    pub region: Region,
    pub url: String,
    /// Identity's home region, set when a 404 came from a different region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_hint: Option<Region>,
}

impl AdsResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Drop caller headers the client injects itself (case-insensitive)
pub fn strip_reserved_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| {
            let reserved = RESERVED_HEADERS.contains(&name.trim().to_ascii_lowercase().as_str());
            if reserved {
                warn!("Ignoring caller-supplied reserved header {}", name.trim());
            }
            !reserved
        })
        .map(|(name, value)| (name.trim().to_string(), value.clone()))
        .collect()
}

/// Request client bound to an [`AuthManager`]
pub struct AdsClient {
    manager: Arc<AuthManager>,
    http: Client,
}

impl AdsClient {
    pub fn new(manager: Arc<AuthManager>) -> Result<Self> {
        let http = build_http_client(manager.settings().http_timeout)?;
        Ok(Self { manager, http })
    }

    pub fn manager(&self) -> &Arc<AuthManager> {
        &self.manager
    }

    /// Send a request as the session's active identity
    pub async fn send(&self, session: Option<&str>, request: &AdsRequest) -> Result<AdsResponse> {
        let identity = self.manager.get_active_identity(session).await?;
        self.execute(session, &identity, request, AuthStage::ApiRequest)
            .await
    }

    /// Try identities with a read-only call and activate the first that works
    ///
    /// This is a heuristic: an identity that can read the check endpoint is not
    /// necessarily the one the user meant. Checks carry no profile scope, so a
    /// profile chosen for another identity cannot make a candidate fail.
    pub async fn auto_detect_identity(&self, session: Option<&str>) -> Result<Identity> {
        let candidates = self.manager.list_identities(session).await?;
        let check = AdsRequest::get(self.manager.settings().identity_check_path.clone());
        let mut last_error = None;

        info!("Auto-detecting identity among {} candidates", candidates.len());

        for identity in candidates {
            match self
                .execute(session, &identity, &check, AuthStage::IdentityCheck)
                .await
            {
                Ok(response) if response.is_success() => {
                    self.manager
                        .set_active_identity(session, &identity.id)
                        .await?;
                    info!("Auto-detected identity {}", identity.id);
                    return Ok(identity);
                }
                Ok(response) => {
                    debug!("Check for {} returned HTTP {}", identity.id, response.status);
                }
                Err(e) => {
                    debug!("Check for {} failed: {}", identity.id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AuthError::NoActiveIdentity))
    }

    async fn execute(
        &self,
        session: Option<&str>,
        identity: &Identity,
        request: &AdsRequest,
        stage: AuthStage,
    ) -> Result<AdsResponse> {
        if request.path.contains("://") {
            return Err(AuthError::Config(format!(
                "request path must be relative to the Ads API host, got {}",
                request.path
            )));
        }

        let caller_headers = strip_reserved_headers(&request.headers);
        let mut attempt = Attempt::First;

        loop {
            let creds = match stage {
                AuthStage::IdentityCheck => {
                    self.manager
                        .unscoped_credentials_for(session, identity)
                        .await?
                }
                _ => {
                    self.manager
                        .credentials_for(session, identity, request.profile_id.as_deref())
                        .await?
                }
            };
            let mut response = self.dispatch(&creds, request, &caller_headers, stage).await?;

            if response.status == 401 {
                match attempt {
                    Attempt::First => {
                        warn!(
                            "HTTP 401 for identity {}, re-minting token {}",
                            identity.id,
                            creds.access_token.preview()
                        );
                        self.manager
                            .invalidate(session, &creds.identity_id, &creds.access_token)
                            .await?;
                        attempt = Attempt::Retry;
                        continue;
                    }
                    Attempt::Retry => {
                        return Err(AuthError::Rejected {
                            identity: identity.id.clone(),
                            stage,
                            detail: format!(
                                "HTTP 401 after re-authentication - {}",
                                truncate_body(&response.body)
                            ),
                        });
                    }
                }
            }

            if response.status >= 500 {
                return Err(AuthError::Transient {
                    stage,
                    detail: format!(
                        "HTTP {} - {}",
                        response.status,
                        truncate_body(&response.body)
                    ),
                });
            }

            if response.status == 404 {
                response.region_hint = region_mismatch(identity, creds.region);
                if let Some(home) = response.region_hint {
                    warn!(
                        "HTTP 404 from {} while identity {} belongs to {}; the region override may be wrong",
                        creds.region, identity.id, home
                    );
                }
            }

            return Ok(response);
        }
    }

    async fn dispatch(
        &self,
        creds: &Credentials,
        request: &AdsRequest,
        caller_headers: &BTreeMap<String, String>,
        stage: AuthStage,
    ) -> Result<AdsResponse> {
        let url = format!(
            "{}/{}",
            creds.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        let mut headers = HeaderMap::new();
        for (name, value) in caller_headers.iter().chain(creds.headers.iter()) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid header {}", name),
            }
        }
        let bearer = HeaderValue::from_str(&format!("Bearer {}", creds.access_token.expose()))
            .map_err(|_| AuthError::InvalidResponse {
                stage,
                detail: "access token is not a valid header value".to_string(),
            })?;
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(
            "{} {} as {} (token {})",
            request.method,
            url,
            creds.identity_id,
            creds.access_token.preview()
        );

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::from_transport(stage, &e))?;

        let status = response.status().as_u16();
        let header_text = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_text("content-type");
        let request_id = header_text("x-amzn-requestid");
        let body = read_body(stage, response).await?;

        info!("{} {} -> HTTP {}", request.method, url, status);

        Ok(AdsResponse {
            status,
            body,
            content_type,
            request_id,
            identity_id: creds.identity_id.clone(),
            region: creds.region,
            url,
            region_hint: None,
        })
    }
}

/// Home region of an identity routed somewhere else
fn region_mismatch(identity: &Identity, routed: Region) -> Option<Region> {
    identity.home_region().filter(|home| *home != routed)
}
