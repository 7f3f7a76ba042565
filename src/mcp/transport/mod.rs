//! HTTP transport shared by every MCP protocol client.
//!
//! Both configured transports speak JSON-RPC over HTTP POST; they differ only
//! in how the server prefers to answer (a single JSON body or an event
//! stream), which the client detects per response.

use crate::core::config::data::HttpSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod streamable_http;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";

const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Transport a server was configured with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpTransportKind {
    #[serde(rename = "sse")]
    Sse,
    #[default]
    #[serde(
        rename = "streamable-http",
        alias = "streamable_http",
        alias = "http"
    )]
    StreamableHttp,
}

impl McpTransportKind {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sse" => Ok(McpTransportKind::Sse),
            "streamable-http" | "streamable_http" | "http" => Ok(McpTransportKind::StreamableHttp),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            McpTransportKind::Sse => "sse",
            McpTransportKind::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for McpTransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn build_mcp_http_client(settings: &HttpSettings) -> Result<reqwest::Client, reqwest::Error> {
    let connect_timeout = settings
        .connect_timeout_secs
        .unwrap_or(MCP_HTTP_CONNECT_TIMEOUT_SECONDS);
    let request_timeout = settings
        .request_timeout_secs
        .unwrap_or(MCP_HTTP_REQUEST_TIMEOUT_SECONDS);

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout))
        .timeout(Duration::from_secs(request_timeout))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
}

pub fn apply_client_post_headers(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request
        .header(reqwest::header::CONTENT_TYPE, MCP_JSON_CONTENT_TYPE)
        .header(reqwest::header::ACCEPT, MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_auth_header(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) if !key.trim().is_empty() => request.bearer_auth(key.trim()),
        _ => request,
    }
}

pub fn apply_session_header(
    request: reqwest::RequestBuilder,
    session_id: Option<&str>,
) -> reqwest::RequestBuilder {
    match session_id {
        Some(session_id) => request.header(MCP_SESSION_ID_HEADER, session_id),
        None => request,
    }
}

pub fn session_id_from_response(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

pub fn content_type_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}
