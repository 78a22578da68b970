//! MCP request handler

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::capabilities::ServerCapabilities;
use super::types::*;
use crate::tools::{builtin_tools, ToolError, ToolExecutor};
use ads_core::AdsClient;

const INSTRUCTIONS: &str = "Amazon Ads API access. Pick an identity with list_identities and \
set_active_identity (or auto_detect_identity), optionally set_region and set_active_profile, \
then use call_ads_api. Routing selections are kept per MCP session.";

/// Handler for MCP requests
///
/// Stateless apart from the shared auth pipeline; the caller passes the
/// session key each message belongs to.
pub struct RequestHandler {
    tool_executor: ToolExecutor,
    server_name: String,
    server_version: String,
}

impl RequestHandler {
    pub fn new(client: Arc<AdsClient>) -> Self {
        Self {
            tool_executor: ToolExecutor::new(client),
            server_name: "Amazon Ads MCP".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Handle an incoming message
    pub async fn handle(&self, message: McpMessage, session: Option<&str>) -> Option<McpMessage> {
        match (&message.method, &message.id) {
            (Some(method), Some(id)) => {
                debug!("Handling request: {}", method);

                let result = match method.as_str() {
                    "initialize" => self.handle_initialize(message.params),
                    "ping" => Ok(serde_json::json!({})),
                    "tools/list" => self.handle_tools_list(),
                    "tools/call" => self.handle_tools_call(message.params, session).await,
                    _ => Err(McpError::method_not_found()),
                };

                Some(match result {
                    Ok(result) => McpMessage::response(id.clone(), result),
                    Err(error) => McpMessage::error_response(Some(id.clone()), error),
                })
            }
            (Some(method), None) => {
                match method.as_str() {
                    "notifications/initialized" | "initialized" => info!("Client initialized"),
                    "notifications/cancelled" => debug!("Request cancelled"),
                    _ => debug!("Unknown notification: {}", method),
                }
                None
            }
            (None, _) if message.result.is_some() || message.error.is_some() => {
                debug!("Ignoring response sent by the client");
                None
            }
            (None, id) => {
                warn!("Message has neither a method nor a result");
                Some(McpMessage::error_response(
                    id.clone(),
                    McpError::invalid_request(),
                ))
            }
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::invalid_params(e.to_string()))?
            .ok_or_else(|| McpError::invalid_params("Missing params"))?;

        info!(
            "Initializing session with client: {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities::with_tools(),
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: self.server_version.clone(),
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        };

        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, McpError> {
        let result = ToolsListResult {
            tools: builtin_tools(),
        };
        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        session: Option<&str>,
    ) -> Result<Value, McpError> {
        let params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::invalid_params(e.to_string()))?
            .ok_or_else(|| McpError::invalid_params("Missing params"))?;

        debug!("Calling tool: {}", params.name);

        let result = match self
            .tool_executor
            .execute(session, &params.name, params.arguments)
            .await
        {
            Ok(result) => result,
            Err(ToolError::UnknownTool(name)) => {
                return Err(McpError::invalid_params(format!("Unknown tool: {}", name)));
            }
            Err(ToolError::Auth(e)) if e.is_transient() => {
                warn!("Tool {} hit a transient failure: {}", params.name, e);
                ToolCallResult::error(format!("{} (temporary, retry later)", e))
            }
            Err(e) => {
                error!("Tool execution failed: {}", e);
                ToolCallResult::error(e.to_string())
            }
        };

        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }
}
