//! JSON-RPC 2.0 envelopes and the MCP payloads the bridge exchanges.

use super::error::McpError;
use rust_mcp_schema::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: i64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Fire-and-forget message; carries no id and expects no response.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub outcome: JsonRpcOutcome,
}

/// A response either carries `error` or `result`; the failure arm is tried
/// first so a payload with an `error` object is never read as a success.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcOutcome {
    Failure { error: RpcError },
    Success { result: Value },
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, McpError> {
        match self.outcome {
            JsonRpcOutcome::Success { result } => Ok(result),
            JsonRpcOutcome::Failure { error } => Err(McpError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
        }
    }

    pub fn into_typed<T: serde::de::DeserializeOwned>(self) -> Result<T, McpError> {
        let value = self.into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Returns true when a decoded message answers the given request id.
///
/// Some servers echo numeric ids as strings, so both spellings match.
pub fn response_id_matches(message: &Value, request_id: i64) -> bool {
    match message.get("id") {
        Some(Value::Number(number)) => number.as_i64() == Some(request_id),
        Some(Value::String(text)) => text.trim() == request_id.to_string(),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInputSchema {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Value>,
}

fn object_type() -> String {
    "object".to_string()
}

impl Default for ToolInputSchema {
    fn default() -> Self {
        Self {
            schema_type: object_type(),
            properties: Map::new(),
            required: Vec::new(),
            additional_properties: None,
        }
    }
}

impl ToolInputSchema {
    pub fn is_required(&self, property: &str) -> bool {
        self.required.iter().any(|name| name == property)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: ToolInputSchema,
}

/// Wire shape of a listed tool before its schema is normalized.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

impl From<RawTool> for Tool {
    fn from(raw: RawTool) -> Self {
        Tool {
            name: raw.name,
            description: raw.description,
            input_schema: normalize_input_schema(raw.input_schema),
        }
    }
}

/// Coerces whatever the server advertised into an object schema.
///
/// Missing, null or malformed schemas become `{type: "object", properties: {}}`.
pub fn normalize_input_schema(schema: Option<Value>) -> ToolInputSchema {
    match schema {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
        _ => ToolInputSchema::default(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    tools: Vec<RawTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ListToolsResult {
    pub fn into_tools(self) -> Vec<Tool> {
        self.tools.into_iter().map(Tool::from).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    /// Content kinds this bridge does not render (audio, resource links, ...).
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn error_text(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Concatenated text parts, one per line.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ToolResultContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
