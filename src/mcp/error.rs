//! Error type shared by the MCP protocol client and the server registry.

use serde_json::Value;
use thiserror::Error;

/// Failures raised while talking to an MCP server or routing a tool call.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server answered with a non-2xx status.
    #[error("HTTP error {status}: {body}")]
    Http { status: String, body: String },

    /// The request could not be sent or its body could not be read.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a JSON-RPC error object.
    #[error("{}", format_rpc_error(.code, .message, .data))]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// An event-stream reply ended before a response for the request arrived.
    #[error("No matching response in stream for request {request_id}")]
    NoMatchingResponse { request_id: i64 },

    /// A reply body was not the JSON shape the method expects.
    #[error("Invalid MCP response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A notification was answered with a status other than 200, 202 or 204.
    #[error("Unexpected status for MCP notification: {0}")]
    UnexpectedNotificationStatus(String),

    #[error("Unknown MCP tool: {0}")]
    UnknownTool(String),

    #[error("MCP server not connected: {0}")]
    ServerNotConnected(String),

    #[error("Invalid MCP server config: {0}")]
    InvalidConfig(String),
}

impl McpError {
    /// JSON-RPC error code, when the server supplied one.
    pub fn code(&self) -> Option<i64> {
        match self {
            McpError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Server-supplied error data, when present.
    pub fn data(&self) -> Option<&Value> {
        match self {
            McpError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// True for failures raised before any request leaves the process.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            McpError::UnknownTool(_) | McpError::ServerNotConnected(_)
        )
    }
}

fn format_rpc_error(code: &i64, message: &str, data: &Option<Value>) -> String {
    let mut output = format!("MCP error {code}: {message}");
    if let Some(data) = data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}
