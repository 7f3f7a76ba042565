//! Tool manifest injected into the model's context.
//!
//! Only the tag calling convention is described: the model emits
//! `<mcp_call tool="...">{json}</mcp_call>` and the host executes the call.

use super::registry::RegisteredTool;
use serde_json::Value;
use std::fmt::Write as _;

pub const MCP_CALL_TAG: &str = "mcp_call";
pub const MCP_RESULT_TAG: &str = "mcp_result";

const MANIFEST_PREAMBLE: &str = "\
# MCP Tools

You can use the tools below. To call one, reply with a tag holding the
qualified tool name and a JSON object of arguments:

<mcp_call tool=\"QUALIFIED_NAME\">{\"argument\": \"value\"}</mcp_call>

Each call is answered with an <mcp_result> block. Only use the names listed here.
";

/// Renders the manifest for `tools`, grouped by server in registration order.
pub fn render_tool_manifest(tools: &[RegisteredTool]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut server_order: Vec<&str> = Vec::new();
    for tool in tools {
        if !server_order.contains(&tool.server_id.as_str()) {
            server_order.push(&tool.server_id);
        }
    }

    let mut out = String::from(MANIFEST_PREAMBLE);
    for server_id in server_order {
        let mut server_tools = tools.iter().filter(|tool| tool.server_id == server_id);
        let Some(first) = server_tools.next() else {
            continue;
        };
        let _ = write!(out, "\n## {} ({})\n", first.server_name, first.server_url);
        write_tool(&mut out, first);
        for tool in server_tools {
            write_tool(&mut out, tool);
        }
    }
    out
}

fn write_tool(out: &mut String, tool: &RegisteredTool) {
    let _ = write!(out, "\n### {}\n", tool.qualified_name);
    if let Some(description) = tool
        .tool
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
    {
        let _ = writeln!(out, "{description}");
    }

    let schema = &tool.tool.input_schema;
    if schema.properties.is_empty() {
        out.push_str("Parameters: none\n");
        return;
    }

    out.push_str("Parameters:\n");
    for (name, property) in &schema.properties {
        let required = if schema.is_required(name) {
            "required"
        } else {
            "optional"
        };
        let _ = write!(out, "- {name}: {} ({required})", property_type(property));
        if let Some(description) = property
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            let _ = write!(out, " - {description}");
        }
        out.push('\n');
    }
}

/// `"string"`, `["string", "null"]` joined with `|`, or `any` when absent.
fn property_type(property: &Value) -> String {
    match property.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(Value::Array(kinds)) => {
            let kinds: Vec<&str> = kinds.iter().filter_map(Value::as_str).collect();
            if kinds.is_empty() {
                "any".to_string()
            } else {
                kinds.join("|")
            }
        }
        _ => "any".to_string(),
    }
}
