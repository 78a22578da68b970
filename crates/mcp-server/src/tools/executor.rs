//! Execute built-in tools against the auth pipeline

use ads_core::{AdsClient, AdsRequest, AuthError, Region};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::catalog::*;
use crate::protocol::ToolCallResult;

/// Tool execution failures
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Deserialize)]
struct IdentityArgs {
    identity_id: String,
}

#[derive(Deserialize)]
struct RegionArgs {
    region: String,
}

#[derive(Deserialize)]
struct ProfileArgs {
    profile_id: Value,
}

#[derive(Debug, Deserialize)]
struct CallArgs {
    #[serde(default)]
    method: Option<String>,
    path: String,
    #[serde(default)]
    query: Map<String, Value>,
    #[serde(default)]
    headers: BTreeMap<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    profile_id: Option<Value>,
}

/// Executor for the built-in tools
pub struct ToolExecutor {
    client: Arc<AdsClient>,
}

impl ToolExecutor {
    pub fn new(client: Arc<AdsClient>) -> Self {
        Self { client }
    }

    /// Execute a tool by name for a session
    pub async fn execute(
        &self,
        session: Option<&str>,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> Result<ToolCallResult, ToolError> {
        debug!("Executing tool {}", tool_name);
        let manager = self.client.manager();

        let result = match tool_name {
            LIST_IDENTITIES => {
                let identities = manager.list_identities(session).await?;
                ToolCallResult::json(&json!({
                    "count": identities.len(),
                    "identities": identities,
                }))
            }
            SET_ACTIVE_IDENTITY => {
                let args: IdentityArgs = parse_args(arguments)?;
                let identity = manager
                    .set_active_identity(session, &args.identity_id)
                    .await?;
                let routing = manager.show_routing_state(session).await?;
                ToolCallResult::json(&json!({
                    "active_identity": identity,
                    "routing": routing,
                }))
            }
            GET_ACTIVE_IDENTITY => {
                ToolCallResult::json(&manager.get_active_identity(session).await?)
            }
            GET_ACTIVE_CREDENTIALS => {
                let creds = manager.get_active_credentials(session).await?;
                ToolCallResult::json(&creds.summary())
            }
            AUTO_DETECT_IDENTITY => {
                let identity = self.client.auto_detect_identity(session).await?;
                ToolCallResult::json(&json!({ "detected": identity }))
            }
            LIST_REGIONS => ToolCallResult::json(&manager.list_regions()),
            SET_REGION => {
                let args: RegionArgs = parse_args(arguments)?;
                let region: Region = args.region.parse()?;
                manager.set_region_override(session, region).await;
                ToolCallResult::json(&manager.show_routing_state(session).await?)
            }
            CLEAR_REGION_OVERRIDE => {
                manager.clear_region_override(session).await;
                ToolCallResult::json(&manager.show_routing_state(session).await?)
            }
            GET_ROUTING_STATE => ToolCallResult::json(&manager.show_routing_state(session).await?),
            SET_ACTIVE_PROFILE => {
                let args: ProfileArgs = parse_args(arguments)?;
                let profile_id = scalar(&args.profile_id).ok_or_else(|| {
                    ToolError::InvalidArguments("profile_id must be a string or number".to_string())
                })?;
                manager.set_active_profile(session, &profile_id).await;
                ToolCallResult::json(&manager.show_routing_state(session).await?)
            }
            CLEAR_ACTIVE_PROFILE => {
                manager.clear_active_profile(session).await;
                ToolCallResult::json(&manager.show_routing_state(session).await?)
            }
            CALL_ADS_API => {
                let args: CallArgs = parse_args(arguments)?;
                self.call_ads_api(session, args).await?
            }
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };

        Ok(result)
    }

    async fn call_ads_api(
        &self,
        session: Option<&str>,
        args: CallArgs,
    ) -> Result<ToolCallResult, ToolError> {
        let method = match args.method.as_deref() {
            None => Method::GET,
            Some(method) => Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| ToolError::InvalidArguments(format!("invalid method {:?}", method)))?,
        };

        let mut request = AdsRequest::new(method, args.path);
        for (name, value) in &args.query {
            let value = scalar(value).ok_or_else(|| {
                ToolError::InvalidArguments(format!("query parameter {} must be a scalar", name))
            })?;
            request = request.with_query(name.as_str(), value);
        }
        for (name, value) in &args.headers {
            let value = scalar(value).ok_or_else(|| {
                ToolError::InvalidArguments(format!("header {} must be a scalar", name))
            })?;
            request = request.with_header(name.as_str(), value);
        }
        if let Some(body) = args.body {
            request = request.with_body(body);
        }
        if let Some(profile_id) = args.profile_id.as_ref().and_then(scalar) {
            request = request.with_profile(profile_id);
        }

        let response = self.client.send(session, &request).await?;
        info!("call_ads_api {} -> HTTP {}", response.url, response.status);

        let body = response
            .json()
            .unwrap_or_else(|| Value::String(response.body.clone()));

        if response.is_success() {
            Ok(ToolCallResult::json(&json!({
                "status": response.status,
                "url": response.url,
                "request_id": response.request_id,
                "body": body,
            })))
        } else {
            let mut message = format!(
                "HTTP {} from {} - {}",
                response.status, response.url, response.body
            );
            if let Some(home) = response.region_hint {
                message.push_str(&format!(
                    " (identity {} belongs to region {}; check the region override)",
                    response.identity_id, home
                ));
            }
            Ok(ToolCallResult::error(message))
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T, ToolError> {
    let arguments = match arguments {
        None | Some(Value::Null) => json!({}),
        Some(value) => value,
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// String form of a JSON scalar
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args_defaults_to_empty_object() {
        #[derive(Deserialize)]
        struct Empty {}
        assert!(parse_args::<Empty>(None).is_ok());
        assert!(parse_args::<Empty>(Some(Value::Null)).is_ok());
    }

    #[test]
    fn test_parse_call_args() {
        let args: CallArgs = parse_args(Some(json!({
            "method": "post",
            "path": "/sp/campaigns/list",
            "query": { "count": 10 },
            "headers": { "Content-Type": "application/vnd.spCampaign.v3+json" },
            "body": { "maxResults": 10 },
            "profile_id": 1234567890
        })))
        .unwrap();
        assert_eq!(args.method.as_deref(), Some("post"));
        assert_eq!(scalar(&args.query["count"]).as_deref(), Some("10"));
        assert_eq!(
            args.profile_id.as_ref().and_then(scalar).as_deref(),
            Some("1234567890")
        );

        let err = parse_args::<CallArgs>(Some(json!({ "method": "GET" }))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_scalar() {
        assert_eq!(scalar(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(scalar(&json!(true)).as_deref(), Some("true"));
        assert!(scalar(&json!({ "nested": 1 })).is_none());
    }
}
