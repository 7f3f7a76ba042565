//! mcp-bridge connects a chat agent to remote Model Context Protocol servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] speaks MCP JSON-RPC over HTTP to each server, keeps the
//!   registry that routes namespaced tool calls to the owning session, and
//!   renders the tool manifest and `<mcp_call>` results for the model.
//! - [`core`] owns the persisted server list and HTTP settings.
//! - [`cli`] is the command-line host that edits the config and drives the
//!   registry.
//!
//! The binary (`src/main.rs`) routes straight into [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod mcp;
