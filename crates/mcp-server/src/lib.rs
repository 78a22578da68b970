//! # mcp-server
//!
//! MCP (Model Context Protocol) server exposing the Amazon Ads auth pipeline
//! as tools. Supports stdio and HTTP transports.

pub mod protocol;
mod server;
pub mod tools;
pub mod transport;

pub use protocol::{McpError, McpMessage, RequestHandler, ServerCapabilities};
pub use server::{McpServer, ServerMode};
pub use tools::{builtin_tools, ToolError, ToolExecutor};
pub use transport::{HttpTransport, StdioTransport, SESSION_HEADER};
