//! Host side of the tag calling convention: pull `<mcp_call>` tags out of a
//! model reply, run them through the registry and format the results.

use super::manifest::{MCP_CALL_TAG, MCP_RESULT_TAG};
use super::protocol::{ToolResult, ToolResultContent};
use super::registry::McpRegistry;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct McpToolCall {
    pub tool: String,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallParseError {
    /// An opening tag without a closing `</mcp_call>`.
    Unclosed { offset: usize },
    MissingToolAttribute { offset: usize },
    InvalidArguments { tool: String, message: String },
}

impl fmt::Display for ToolCallParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallParseError::Unclosed { offset } => {
                write!(f, "Unclosed <{MCP_CALL_TAG}> tag at byte {offset}")
            }
            ToolCallParseError::MissingToolAttribute { offset } => {
                write!(f, "<{MCP_CALL_TAG}> tag at byte {offset} has no tool attribute")
            }
            ToolCallParseError::InvalidArguments { tool, message } => {
                write!(f, "Invalid arguments for {tool}: {message}")
            }
        }
    }
}

impl std::error::Error for ToolCallParseError {}

/// A located tag: byte range in the source text plus its pieces.
struct RawCall<'a> {
    start: usize,
    end: Option<usize>,
    open_tag: &'a str,
    body: &'a str,
}

fn scan_calls(text: &str) -> Vec<RawCall<'_>> {
    let opener = format!("<{MCP_CALL_TAG}");
    let closer = format!("</{MCP_CALL_TAG}>");
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(&opener) {
        let start = cursor + found;
        let after_name = start + opener.len();
        let boundary_ok = text[after_name..]
            .chars()
            .next()
            .is_some_and(|ch| ch == '>' || ch.is_whitespace());
        if !boundary_ok {
            cursor = after_name;
            continue;
        }

        let Some(tag_close) = text[after_name..].find('>') else {
            calls.push(RawCall {
                start,
                end: None,
                open_tag: &text[start..],
                body: "",
            });
            break;
        };
        let body_start = after_name + tag_close + 1;
        let open_tag = &text[start..body_start];

        match text[body_start..].find(&closer) {
            Some(body_len) => {
                let end = body_start + body_len + closer.len();
                calls.push(RawCall {
                    start,
                    end: Some(end),
                    open_tag,
                    body: &text[body_start..body_start + body_len],
                });
                cursor = end;
            }
            None => {
                calls.push(RawCall {
                    start,
                    end: None,
                    open_tag,
                    body: &text[body_start..],
                });
                break;
            }
        }
    }

    calls
}

/// Value of `tool="..."` or `tool='...'` inside an opening tag.
fn tool_attribute(open_tag: &str) -> Option<&str> {
    let mut rest = open_tag;
    while let Some(index) = rest.find("tool") {
        let preceded_by_space = rest[..index]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let after = rest[index + "tool".len()..].trim_start();
        if preceded_by_space {
            if let Some(value) = after.strip_prefix('=') {
                let value = value.trim_start();
                let quote = value.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let inner = &value[1..];
                    let close = inner.find(quote)?;
                    return Some(inner[..close].trim()).filter(|name| !name.is_empty());
                }
                return None;
            }
        }
        rest = &rest[index + "tool".len()..];
    }
    None
}

fn parse_call(raw: &RawCall<'_>) -> Result<McpToolCall, ToolCallParseError> {
    if raw.end.is_none() {
        return Err(ToolCallParseError::Unclosed { offset: raw.start });
    }
    let tool = tool_attribute(raw.open_tag)
        .ok_or(ToolCallParseError::MissingToolAttribute { offset: raw.start })?
        .to_string();

    let body = raw.body.trim();
    if body.is_empty() {
        return Ok(McpToolCall {
            tool,
            arguments: Map::new(),
        });
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(arguments)) => Ok(McpToolCall { tool, arguments }),
        Ok(other) => Err(ToolCallParseError::InvalidArguments {
            tool,
            message: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(err) => Err(ToolCallParseError::InvalidArguments {
            tool,
            message: err.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Every `<mcp_call>` tag in `text`, in order, each parsed independently.
pub fn extract_tool_calls(text: &str) -> Vec<Result<McpToolCall, ToolCallParseError>> {
    scan_calls(text).iter().map(parse_call).collect()
}

/// The reply with every complete `<mcp_call>` tag removed.
pub fn strip_tool_calls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for call in scan_calls(text) {
        if let Some(end) = call.end {
            out.push_str(&text[cursor..call.start]);
            cursor = end;
        }
    }
    out.push_str(&text[cursor..]);
    out.trim().to_string()
}

/// Runs calls one after another. Failures become error results so every call
/// gets an answer.
pub async fn execute_tool_calls(
    registry: &McpRegistry,
    calls: Vec<McpToolCall>,
) -> Vec<(McpToolCall, ToolResult)> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        debug!(tool = %call.tool, "Executing MCP tool call");
        let result = match registry.call_tool(&call.tool, call.arguments.clone()).await {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = %call.tool, error = %err, "MCP tool call failed");
                ToolResult::error_text(err.to_string())
            }
        };
        results.push((call, result));
    }
    results
}

/// Renders one result as an `<mcp_result>` block for the model.
pub fn format_tool_result(tool: &str, result: &ToolResult) -> String {
    let status = if result.is_error { "error" } else { "ok" };
    let mut parts = Vec::new();
    for item in &result.content {
        match item {
            ToolResultContent::Text { text } => parts.push(text.clone()),
            ToolResultContent::Image { data, mime_type } => {
                parts.push(format!("[image {mime_type}, {} bytes base64]", data.len()))
            }
            ToolResultContent::Resource { resource } => match &resource.text {
                Some(text) => parts.push(format!("[resource {}]\n{text}", resource.uri)),
                None => parts.push(format!("[resource {}]", resource.uri)),
            },
            ToolResultContent::Unsupported => parts.push("[unsupported content]".to_string()),
        }
    }
    format!(
        "<{MCP_RESULT_TAG} tool=\"{tool}\" status=\"{status}\">\n{}\n</{MCP_RESULT_TAG}>",
        parts.join("\n")
    )
}
