//! HTTP transport for MCP
//!
//! JSON-RPC over `POST /mcp`. Each client is identified by the
//! `Mcp-Session-Id` header; an `initialize` without one is issued a fresh id,
//! returned in the same header. Routing selections (identity, region override,
//! profile) are kept per session id.
//!
//! When caller tokens are enabled, an `Authorization: Bearer` value shaped like
//! a broker refresh token binds the session to that token. A request carrying
//! such a token but no session id is keyed by the token's fingerprint, so it
//! never falls into the shared default entry.
//!
//! Every message is handled inside a `mcp_request` span carrying a short
//! request id and the masked session id.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::protocol::{McpError, McpMessage, RequestHandler};
use ads_core::{mask, AdsClient, SecretString};

/// Session header (lowercase, as `HeaderMap` stores it)
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Bearer values at or below this length are not broker refresh tokens
const MIN_REFRESH_TOKEN_LEN: usize = 20;

/// Characters of the request UUID kept in log spans
const REQUEST_ID_CHARS: usize = 8;

/// Shared state for HTTP handlers
struct AppState {
    handler: RequestHandler,
    client: Arc<AdsClient>,
}

/// HTTP transport for MCP protocol
pub struct HttpTransport {
    client: Arc<AdsClient>,
    port: u16,
}

impl HttpTransport {
    pub fn new(client: Arc<AdsClient>, port: u16) -> Self {
        Self { client, port }
    }

    /// Routes with CORS and request tracing
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            handler: RequestHandler::new(self.client.clone()),
            client: self.client.clone(),
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

        Router::new()
            .route("/", get(health))
            .route("/health", get(health))
            .route("/mcp", post(handle_mcp_request).delete(end_session))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Run the HTTP server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = format!("0.0.0.0:{}", self.port);
        info!("Starting MCP HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

async fn health() -> &'static str {
    "OK"
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Broker refresh token sent as a bearer credential (`<client>:<secret>`)
fn caller_refresh_token(headers: &HeaderMap) -> Option<SecretString> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer")
        && token.contains(':')
        && token.len() > MIN_REFRESH_TOKEN_LEN)
        .then(|| SecretString::new(token))
}

fn request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(REQUEST_ID_CHARS);
    id
}

/// Handle one JSON-RPC message
async fn handle_mcp_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let span = info_span!(
        "mcp_request",
        request = %request_id(),
        session = tracing::field::Empty
    );
    process_message(state, headers, body).instrument(span).await
}

async fn process_message(state: Arc<AppState>, headers: HeaderMap, body: String) -> Response {
    let message: McpMessage = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to parse message: {}", e);
            return Json(McpMessage::error_response(None, McpError::parse_error()))
                .into_response();
        }
    };

    let manager = state.client.manager();
    let caller_token = if manager.accepts_caller_tokens() {
        caller_refresh_token(&headers)
    } else {
        None
    };

    let mut session = session_id(&headers);
    if session.is_none() && message.is_initialize() {
        let issued = Uuid::new_v4().to_string();
        info!("Issued MCP session {}", mask(&issued));
        session = Some(issued);
    }

    let routing_key = session.clone().or_else(|| {
        caller_token
            .as_ref()
            .map(|token| format!("caller-{}", token.fingerprint()))
    });
    if let Some(key) = &routing_key {
        Span::current().record("session", mask(key).as_str());
    }
    if let (Some(key), Some(token)) = (&routing_key, &caller_token) {
        manager.bind_refresh_token(key, token).await;
        debug!("Request authenticated with caller refresh token {}", token.preview());
    }
    debug!("HTTP message {:?}", message.method);

    let mut response = match state.handler.handle(message, routing_key.as_deref()).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    if let Some(value) = session.and_then(|s| HeaderValue::from_str(&s).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Forget a session's routing selections
async fn end_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    match session_id(&headers) {
        Some(session) => {
            state.client.manager().end_session(&session).await;
            info!("Ended MCP session {}", mask(&session));
            StatusCode::NO_CONTENT
        }
        None => StatusCode::BAD_REQUEST,
    }
}
