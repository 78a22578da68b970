//! Transport implementations for MCP server

mod http;
mod stdio;

pub use http::{HttpTransport, SESSION_HEADER};
pub use stdio::StdioTransport;
