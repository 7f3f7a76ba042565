use crate::mcp::transport::McpTransportKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One remote MCP server as configured by the user.
///
/// `id` is the stable identity; everything else may change between connects.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub transport: McpTransportKind,
    #[serde(default, alias = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now", alias = "createdAt")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            transport: McpTransportKind::default(),
            api_key: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_transport(mut self, transport: McpTransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Checks the fields a connection attempt depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("MCP server id cannot be empty.".to_string());
        }
        let url = self.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!(
                "MCP server '{}' url must start with http:// or https:// (got '{}').",
                self.id, self.url
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct HttpSettings {
    /// Seconds allowed for establishing a connection to an MCP server
    pub connect_timeout_secs: Option<u64>,
    /// Seconds allowed for a whole request, including streamed replies
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub mcp_servers: Vec<ServerConfig>,
    #[serde(default)]
    pub http: HttpSettings,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn get_mcp_server(&self, id: &str) -> Option<&ServerConfig> {
        self.mcp_servers
            .iter()
            .find(|server| server.id.eq_ignore_ascii_case(id))
    }

    pub fn get_mcp_server_mut(&mut self, id: &str) -> Option<&mut ServerConfig> {
        self.mcp_servers
            .iter_mut()
            .find(|server| server.id.eq_ignore_ascii_case(id))
    }

    pub fn list_mcp_servers(&self) -> Vec<&ServerConfig> {
        self.mcp_servers.iter().collect()
    }

    pub fn enabled_mcp_servers(&self) -> Vec<ServerConfig> {
        self.mcp_servers
            .iter()
            .filter(|server| server.enabled)
            .cloned()
            .collect()
    }

    /// Inserts a server, replacing any existing entry with the same id.
    pub fn upsert_mcp_server(&mut self, server: ServerConfig) {
        match self.get_mcp_server_mut(&server.id) {
            Some(existing) => *existing = server,
            None => self.mcp_servers.push(server),
        }
    }

    /// Returns true when a server was removed.
    pub fn remove_mcp_server(&mut self, id: &str) -> bool {
        let before = self.mcp_servers.len();
        self.mcp_servers
            .retain(|server| !server.id.eq_ignore_ascii_case(id));
        self.mcp_servers.len() != before
    }

    /// Returns false when no server matches `id`.
    pub fn set_mcp_server_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.get_mcp_server_mut(id) {
            Some(server) => {
                server.enabled = enabled;
                true
            }
            None => false,
        }
    }
}
