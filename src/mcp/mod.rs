//! MCP client subsystem: per-server protocol sessions, the registry that
//! routes namespaced tool calls to them, and the tag-based call bridge.

pub mod client;
pub mod error;
pub mod manifest;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod tool_call;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{HttpConnector, McpClient, McpSession, SessionConnector};
pub use error::McpError;
pub use registry::{McpRegistry, RegisteredTool, SubscriptionId};
pub use state::{ConnectionState, ServerState};
