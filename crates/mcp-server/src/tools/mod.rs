//! Built-in tool catalog and execution

pub mod catalog;
mod executor;

pub use catalog::builtin_tools;
pub use executor::{ToolError, ToolExecutor};
