//! Server registry and tool router.
//!
//! The registry owns one [`McpSession`] per connected server, merges every
//! discovered tool into a single namespace of qualified names
//! (`mcp_<server>_<tool>`), routes calls to the owning session and publishes
//! every state transition to its subscribers.
//!
//! Bookkeeping sits behind a synchronous mutex that is never held across an
//! `.await`, so connects for different servers overlap freely. Two concurrent
//! connects for the same id race; the last one to register wins, and callers
//! are expected to serialize reconnects per id.

use crate::core::config::data::ServerConfig;
use crate::mcp::client::{McpSession, SessionConnector};
use crate::mcp::error::McpError;
use crate::mcp::manifest::render_tool_manifest;
use crate::mcp::protocol::{Tool, ToolResult};
use crate::mcp::state::ServerState;
use futures_util::future::join_all;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const MCP_TOOL_PREFIX: &str = "mcp_";
const MCP_STARTUP_CONCURRENCY_LIMIT: usize = 3;

/// A tool as exposed to the agent: the server's tool plus its routing data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTool {
    #[serde(flatten)]
    pub tool: Tool,
    pub server_id: String,
    pub server_name: String,
    pub server_url: String,
    pub qualified_name: String,
}

/// Lower-cases and replaces every non-alphanumeric character with `_`.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

pub fn qualified_tool_name(server_name: &str, tool_name: &str) -> String {
    format!("{MCP_TOOL_PREFIX}{}_{tool_name}", slug(server_name))
}

pub type StateCallback = Arc<dyn Fn(&str, &ServerState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<dyn McpSession>>,
    states: HashMap<String, ServerState>,
    /// Registration order is preserved so listings and the manifest are stable.
    tools: Vec<RegisteredTool>,
}

impl RegistryInner {
    fn remove_tools_for(&mut self, server_id: &str) {
        self.tools.retain(|tool| tool.server_id != server_id);
    }

    fn unique_name(&self, candidate: String) -> String {
        if !self.is_taken(&candidate) {
            return candidate;
        }
        let mut suffix = 2;
        loop {
            let name = format!("{candidate}_{suffix}");
            if !self.is_taken(&name) {
                return name;
            }
            suffix += 1;
        }
    }

    fn is_taken(&self, qualified_name: &str) -> bool {
        self.tools
            .iter()
            .any(|tool| tool.qualified_name == qualified_name)
    }

    fn register_tools(&mut self, config: &ServerConfig, tools: &[Tool]) -> Vec<RegisteredTool> {
        self.remove_tools_for(&config.id);
        let mut registered = Vec::with_capacity(tools.len());
        for tool in tools {
            let candidate = qualified_tool_name(&config.name, &tool.name);
            let qualified_name = self.unique_name(candidate.clone());
            if qualified_name != candidate {
                warn!(
                    server_id = %config.id,
                    tool = %tool.name,
                    qualified_name = %qualified_name,
                    "MCP tool name collision, registered with suffix"
                );
            }
            let entry = RegisteredTool {
                tool: tool.clone(),
                server_id: config.id.clone(),
                server_name: config.name.clone(),
                server_url: config.url.clone(),
                qualified_name,
            };
            self.tools.push(entry.clone());
            registered.push(entry);
        }
        registered
    }
}

pub struct McpRegistry {
    connector: Arc<dyn SessionConnector>,
    inner: Mutex<RegistryInner>,
    subscribers: Mutex<Vec<(SubscriptionId, StateCallback)>>,
    next_subscription: AtomicU64,
}

impl McpRegistry {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            inner: Mutex::new(RegistryInner::default()),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn inner(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback invoked synchronously on every state transition.
    pub fn on_state_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &ServerState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    fn set_state(&self, server_id: &str, state: ServerState) {
        debug!(server_id = %server_id, state = %state.connection_state, "MCP server state changed");
        self.inner()
            .states
            .insert(server_id.to_string(), state.clone());
        self.notify(server_id, &state);
    }

    /// Subscribers run outside every registry lock so they may call back in.
    fn notify(&self, server_id: &str, state: &ServerState) {
        let callbacks: Vec<StateCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(server_id, state))).is_err() {
                warn!(server_id = %server_id, "MCP state subscriber panicked");
            }
        }
    }

    /// Opens a fresh session, handshakes and registers the server's tools.
    ///
    /// An existing session for the same id is disconnected first. On failure
    /// the server is left in the `error` state and the error is returned.
    pub async fn connect_server(
        &self,
        config: ServerConfig,
    ) -> Result<Vec<RegisteredTool>, McpError> {
        let has_session = self.inner().sessions.contains_key(&config.id);
        if has_session {
            self.disconnect_server(&config.id).await;
        }

        self.set_state(&config.id, ServerState::connecting());

        match self.open_session(&config).await {
            Ok((session, tools)) => {
                let registered = {
                    let mut inner = self.inner();
                    inner.sessions.insert(config.id.clone(), session);
                    inner.register_tools(&config, &tools)
                };
                info!(
                    server_id = %config.id,
                    tools = registered.len(),
                    "Connected to MCP server"
                );
                self.set_state(&config.id, ServerState::connected(tools));
                Ok(registered)
            }
            Err(err) => {
                warn!(server_id = %config.id, error = %err, "MCP server connection failed");
                self.set_state(&config.id, ServerState::failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn open_session(
        &self,
        config: &ServerConfig,
    ) -> Result<(Arc<dyn McpSession>, Vec<Tool>), McpError> {
        let session = self.connector.open(config)?;
        session.initialize().await?;
        let tools = session.list_tools().await?;
        Ok((session, tools))
    }

    /// Connects every enabled config, a few at a time.
    ///
    /// Failures are recorded per server and never stop the remaining connects.
    pub async fn connect_all(
        &self,
        configs: impl IntoIterator<Item = ServerConfig>,
    ) -> Vec<(String, Result<Vec<RegisteredTool>, McpError>)> {
        let enabled: Vec<ServerConfig> = configs.into_iter().filter(|c| c.enabled).collect();

        stream::iter(enabled)
            .map(|config| async move {
                let server_id = config.id.clone();
                (server_id, self.connect_server(config).await)
            })
            .buffer_unordered(MCP_STARTUP_CONCURRENCY_LIMIT)
            .collect()
            .await
    }

    /// Tears a server down regardless of its current state.
    pub async fn disconnect_server(&self, server_id: &str) {
        let session = {
            let mut inner = self.inner();
            inner.remove_tools_for(server_id);
            inner.sessions.remove(server_id)
        };

        if let Some(session) = session {
            session.close().await;
        }

        self.set_state(server_id, ServerState::disconnected());
    }

    pub async fn disconnect_all(&self) {
        let server_ids: Vec<String> = {
            let inner = self.inner();
            let mut ids: Vec<String> = inner.states.keys().cloned().collect();
            for id in inner.sessions.keys() {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            ids
        };

        join_all(
            server_ids
                .iter()
                .map(|server_id| self.disconnect_server(server_id)),
        )
        .await;
    }

    pub async fn reconnect_server(
        &self,
        config: ServerConfig,
    ) -> Result<Vec<RegisteredTool>, McpError> {
        self.disconnect_server(&config.id).await;
        self.connect_server(config).await
    }

    /// Unknown servers report `disconnected`.
    pub fn get_server_state(&self, server_id: &str) -> ServerState {
        self.inner()
            .states
            .get(server_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn server_states(&self) -> Vec<(String, ServerState)> {
        let mut states: Vec<(String, ServerState)> = self
            .inner()
            .states
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn get_all_tools(&self) -> Vec<RegisteredTool> {
        self.inner().tools.clone()
    }

    pub fn get_tools_for_server(&self, server_id: &str) -> Vec<RegisteredTool> {
        self.inner()
            .tools
            .iter()
            .filter(|tool| tool.server_id == server_id)
            .cloned()
            .collect()
    }

    pub fn find_tool(&self, qualified_name: &str) -> Option<RegisteredTool> {
        self.inner()
            .tools
            .iter()
            .find(|tool| tool.qualified_name == qualified_name)
            .cloned()
    }

    /// True only for qualified names that are registered right now.
    pub fn is_mcp_tool(&self, name: &str) -> bool {
        name.starts_with(MCP_TOOL_PREFIX) && self.find_tool(name).is_some()
    }

    /// Routes a call to the session owning `qualified_name`.
    ///
    /// Routing failures happen before any network traffic. Errors from the
    /// server are returned untouched for the caller to report.
    pub async fn call_tool(
        &self,
        qualified_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, McpError> {
        let (tool_name, session) = {
            let inner = self.inner();
            let tool = inner
                .tools
                .iter()
                .find(|tool| tool.qualified_name == qualified_name)
                .ok_or_else(|| McpError::UnknownTool(qualified_name.to_string()))?;
            let session = inner
                .sessions
                .get(&tool.server_id)
                .cloned()
                .ok_or_else(|| McpError::ServerNotConnected(tool.server_id.clone()))?;
            (tool.tool.name.clone(), session)
        };

        debug!(qualified_name, tool = %tool_name, "Routing MCP tool call");
        session.call_tool(&tool_name, arguments).await
    }

    /// Instruction text describing every registered tool; empty when none.
    pub fn generate_tool_manifest(&self) -> String {
        render_tool_manifest(&self.get_all_tools())
    }
}

#[cfg(test)]
mod tests;
