//! Main MCP server orchestration

use std::sync::Arc;

use crate::transport::{HttpTransport, StdioTransport};
use ads_core::AdsClient;

/// Server mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    /// stdio transport (desktop MCP clients)
    #[default]
    Stdio,
    /// HTTP transport
    Http { port: u16 },
}

/// MCP server
pub struct McpServer {
    client: Arc<AdsClient>,
    mode: ServerMode,
}

impl McpServer {
    pub fn new(client: Arc<AdsClient>) -> Self {
        Self {
            client,
            mode: ServerMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run until the transport finishes
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        match self.mode {
            ServerMode::Stdio => StdioTransport::new(self.client.clone()).run().await,
            ServerMode::Http { port } => HttpTransport::new(self.client.clone(), port).run().await,
        }
    }
}
