//! Built-in tool definitions

use serde_json::{json, Map, Value};

use crate::protocol::{McpInputSchema, McpTool};

pub const LIST_IDENTITIES: &str = "list_identities";
pub const SET_ACTIVE_IDENTITY: &str = "set_active_identity";
pub const GET_ACTIVE_IDENTITY: &str = "get_active_identity";
pub const GET_ACTIVE_CREDENTIALS: &str = "get_active_credentials";
pub const AUTO_DETECT_IDENTITY: &str = "auto_detect_identity";
pub const LIST_REGIONS: &str = "list_regions";
pub const SET_REGION: &str = "set_region";
pub const CLEAR_REGION_OVERRIDE: &str = "clear_region_override";
pub const GET_ROUTING_STATE: &str = "get_routing_state";
pub const SET_ACTIVE_PROFILE: &str = "set_active_profile";
pub const CLEAR_ACTIVE_PROFILE: &str = "clear_active_profile";
pub const CALL_ADS_API: &str = "call_ads_api";

/// Builder for one tool's input schema
struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    fn new() -> Self {
        Self {
            properties: Map::new(),
            required: Vec::new(),
        }
    }

    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({ "type": "string", "description": description }),
            required,
        )
    }

    fn build(self) -> McpInputSchema {
        McpInputSchema {
            schema_type: "object".to_string(),
            properties: if self.properties.is_empty() {
                None
            } else {
                Some(self.properties)
            },
            required: if self.required.is_empty() {
                None
            } else {
                Some(self.required)
            },
        }
    }
}

fn tool(name: &str, description: &str, schema: SchemaBuilder) -> McpTool {
    McpTool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema.build(),
    }
}

/// Every tool the server exposes
pub fn builtin_tools() -> Vec<McpTool> {
    vec![
        tool(
            LIST_IDENTITIES,
            "List the Amazon Ads identities available to the configured credentials.",
            SchemaBuilder::new(),
        ),
        tool(
            SET_ACTIVE_IDENTITY,
            "Select the identity used for subsequent Amazon Ads API calls. \
             The id must come from list_identities.",
            SchemaBuilder::new().string("identity_id", "Identity id from list_identities", true),
        ),
        tool(
            GET_ACTIVE_IDENTITY,
            "Show the identity currently used for Amazon Ads API calls.",
            SchemaBuilder::new(),
        ),
        tool(
            GET_ACTIVE_CREDENTIALS,
            "Resolve credentials for the active identity and show a masked summary \
             (token preview, expiry, endpoint, headers).",
            SchemaBuilder::new(),
        ),
        tool(
            AUTO_DETECT_IDENTITY,
            "Try each identity with a read-only call and activate the first that succeeds. \
             Best effort: check the result matches the account you expect.",
            SchemaBuilder::new(),
        ),
        tool(
            LIST_REGIONS,
            "List Amazon Ads regions with their API and OAuth endpoints.",
            SchemaBuilder::new(),
        ),
        tool(
            SET_REGION,
            "Route API calls to a region regardless of the identity's home region.",
            SchemaBuilder::new().property(
                "region",
                json!({
                    "type": "string",
                    "enum": ["na", "eu", "fe"],
                    "description": "Region code"
                }),
                true,
            ),
        ),
        tool(
            CLEAR_REGION_OVERRIDE,
            "Remove the region override and route by identity or default region again.",
            SchemaBuilder::new(),
        ),
        tool(
            GET_ROUTING_STATE,
            "Show the host, region, identity and profile API calls currently resolve to.",
            SchemaBuilder::new(),
        ),
        tool(
            SET_ACTIVE_PROFILE,
            "Scope subsequent API calls to an advertising profile \
             (Amazon-Advertising-API-Scope header).",
            SchemaBuilder::new().string("profile_id", "Advertising profile id", true),
        ),
        tool(
            CLEAR_ACTIVE_PROFILE,
            "Stop sending a session profile scope; the configured default applies again.",
            SchemaBuilder::new(),
        ),
        tool(
            CALL_ADS_API,
            "Call any Amazon Ads API endpoint as the active identity. Authorization, \
             client id and scope headers are injected and cannot be overridden.",
            SchemaBuilder::new()
                .property(
                    "method",
                    json!({
                        "type": "string",
                        "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                        "description": "HTTP method (default GET)"
                    }),
                    false,
                )
                .string("path", "Path relative to the API host, e.g. /v2/profiles", true)
                .property(
                    "query",
                    json!({
                        "type": "object",
                        "additionalProperties": { "type": ["string", "number", "boolean"] },
                        "description": "Query string parameters"
                    }),
                    false,
                )
                .property(
                    "headers",
                    json!({
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Extra headers such as a vendor Content-Type"
                    }),
                    false,
                )
                .property("body", json!({ "description": "JSON request body" }), false)
                .string("profile_id", "Profile scope for this call only", false),
        ),
    ]
}
