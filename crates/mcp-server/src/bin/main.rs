//! Amazon Ads MCP server
//!
//! Reads credentials from the environment (and a `.env` file if present),
//! then serves the auth tools over stdio or HTTP. Logs always go to stderr so
//! the stdio protocol stream stays clean.

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ads_core::{AdsClient, AuthManager, Settings};
use mcp_server::{McpServer, ServerMode};

/// Amazon Ads MCP server - identity, region and authenticated API tools
#[derive(Parser, Debug)]
#[command(name = "amazon-ads-mcp")]
#[command(version)]
#[command(about = "Amazon Ads API access for MCP clients")]
struct Args {
    /// Run in stdio mode (default)
    #[arg(long)]
    stdio: bool,

    /// Run in HTTP mode
    #[arg(long, conflicts_with = "stdio")]
    http: bool,

    /// Port for the HTTP server
    #[arg(long, env = "PORT", default_value = "9080")]
    port: u16,
}

/// `LOG_LEVEL`, then `RUST_LOG`, then `info`
fn env_filter() -> EnvFilter {
    std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level.to_ascii_lowercase()).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing .env is fine
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let settings =
        Settings::from_env().map_err(|e| format!("Failed to load configuration: {}", e))?;
    let manager = Arc::new(
        AuthManager::from_settings(settings)
            .map_err(|e| format!("Failed to initialize auth: {}", e))?,
    );
    let client = Arc::new(AdsClient::new(manager)?);

    let mode = if args.http {
        ServerMode::Http { port: args.port }
    } else {
        ServerMode::Stdio
    };

    McpServer::new(client).with_mode(mode).run().await
}
