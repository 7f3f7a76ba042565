//! Command-line host for the MCP bridge
//!
//! Edits the server list stored in the config file, connects enabled servers
//! through an [`McpRegistry`] and drives the `<mcp_call>` bridge.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::config::{Config, ServerConfig};
use crate::mcp::client::HttpConnector;
use crate::mcp::protocol::ToolResult;
use crate::mcp::registry::McpRegistry;
use crate::mcp::state::{ConnectionState, ServerState};
use crate::mcp::tool_call::{execute_tool_calls, extract_tool_calls, format_tool_result};
use crate::mcp::transport::McpTransportKind;

#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(version)]
#[command(about = "Connect a chat agent to remote MCP tool servers")]
#[command(
    long_about = "mcp-bridge keeps a list of remote Model Context Protocol servers, \
connects the enabled ones over HTTP and exposes their tools under qualified names \
(mcp_<server>_<tool>).\n\n\
The model calls tools by emitting tags such as:\n\
  <mcp_call tool=\"mcp_files_read_file\">{\"path\": \"/tmp/notes.txt\"}</mcp_call>\n\n\
Environment Variables:\n\
  RUST_LOG          Log filter for diagnostics on stderr (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// List configured MCP servers
    Servers,
    /// Add or replace an MCP server
    Add {
        /// Stable identifier for the server
        id: String,
        /// Display name, also used in qualified tool names
        name: String,
        /// Endpoint URL (http:// or https://)
        url: String,
        /// Transport: streamable-http or sse
        #[arg(long, value_parser = McpTransportKind::parse, default_value = "streamable-http")]
        transport: McpTransportKind,
        /// Bearer token sent with every request
        #[arg(long)]
        api_key: Option<String>,
        /// Store the server without connecting it on startup
        #[arg(long)]
        disabled: bool,
    },
    /// Remove an MCP server
    Remove { id: String },
    /// Enable an MCP server
    Enable { id: String },
    /// Disable an MCP server
    Disable { id: String },
    /// Connect enabled servers and list their tools
    Tools,
    /// Print the tool manifest for the model's context
    Manifest,
    /// Call one tool by qualified name
    Call {
        /// Qualified tool name, e.g. mcp_files_read_file
        tool: String,
        /// JSON object with the tool arguments
        arguments: Option<String>,
    },
    /// Execute the <mcp_call> tags of a model reply read from stdin
    Run,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(Config::default_config_path()?),
    }
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = resolve_config_path(args.config)?;

    match args.command {
        Commands::Servers => {
            let config = Config::load_from_path(&config_path)?;
            print!("{}", format_server_list(&config));
            Ok(())
        }
        Commands::Add {
            id,
            name,
            url,
            transport,
            api_key,
            disabled,
        } => {
            let mut server = ServerConfig::new(id, name, url).with_transport(transport);
            server.api_key = api_key;
            server.enabled = !disabled;
            add_server(&config_path, server)?;
            Ok(())
        }
        Commands::Remove { id } => {
            remove_server(&config_path, &id)?;
            println!("✅ Removed MCP server: {id}");
            Ok(())
        }
        Commands::Enable { id } => {
            set_server_enabled(&config_path, &id, true)?;
            println!("✅ Enabled MCP server: {id}");
            Ok(())
        }
        Commands::Disable { id } => {
            set_server_enabled(&config_path, &id, false)?;
            println!("✅ Disabled MCP server: {id}");
            Ok(())
        }
        Commands::Tools => {
            let config = Config::load_from_path(&config_path)?;
            let registry = connect_registry(&config).await?;
            print!("{}", format_registry_overview(&registry));
            registry.disconnect_all().await;
            Ok(())
        }
        Commands::Manifest => {
            let config = Config::load_from_path(&config_path)?;
            let registry = connect_registry(&config).await?;
            print!("{}", registry.generate_tool_manifest());
            registry.disconnect_all().await;
            Ok(())
        }
        Commands::Call { tool, arguments } => {
            let arguments = parse_arguments(arguments.as_deref())?;
            let config = Config::load_from_path(&config_path)?;
            let registry = connect_registry(&config).await?;
            let outcome = registry.call_tool(&tool, arguments).await;
            registry.disconnect_all().await;
            let result = outcome?;
            println!("{}", format_tool_result(&tool, &result));
            Ok(())
        }
        Commands::Run => {
            let mut reply = String::new();
            tokio::io::stdin().read_to_string(&mut reply).await?;
            let config = Config::load_from_path(&config_path)?;
            let registry = connect_registry(&config).await?;
            for block in run_reply(&registry, &reply).await {
                println!("{block}");
            }
            registry.disconnect_all().await;
            Ok(())
        }
    }
}

fn add_server(config_path: &Path, server: ServerConfig) -> Result<(), Box<dyn Error>> {
    server.validate()?;
    let mut config = Config::load_from_path(config_path)?;
    let replaced = config.get_mcp_server(&server.id).is_some();
    let id = server.id.clone();
    config.upsert_mcp_server(server);
    config.save_to_path(config_path)?;
    if replaced {
        println!("✅ Updated MCP server: {id}");
    } else {
        println!("✅ Added MCP server: {id}");
    }
    Ok(())
}

fn remove_server(config_path: &Path, id: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_from_path(config_path)?;
    if !config.remove_mcp_server(id) {
        return Err(format!("Unknown MCP server: {id}").into());
    }
    config.save_to_path(config_path)?;
    Ok(())
}

fn set_server_enabled(config_path: &Path, id: &str, enabled: bool) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_from_path(config_path)?;
    if !config.set_mcp_server_enabled(id, enabled) {
        return Err(format!("Unknown MCP server: {id}").into());
    }
    config.save_to_path(config_path)?;
    Ok(())
}

fn log_state_change(server_id: &str, state: &ServerState) {
    match &state.error {
        Some(error) => info!(
            server_id = %server_id,
            state = %state.connection_state,
            error = %error,
            "MCP server state"
        ),
        None => info!(
            server_id = %server_id,
            state = %state.connection_state,
            tools = state.tools.len(),
            "MCP server state"
        ),
    }
}

async fn connect_registry(config: &Config) -> Result<McpRegistry, Box<dyn Error>> {
    let connector = HttpConnector::new(&config.http)?;
    let registry = McpRegistry::new(Arc::new(connector));
    registry.on_state_change(log_state_change);

    for (server_id, outcome) in registry.connect_all(config.enabled_mcp_servers()).await {
        if let Err(err) = outcome {
            eprintln!("⚠️  MCP server {server_id} failed to connect: {err}");
        }
    }
    Ok(registry)
}

/// Arguments given on the command line; absent or blank means `{}`.
fn parse_arguments(raw: Option<&str>) -> Result<Map<String, Value>, Box<dyn Error>> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(arguments) => Ok(arguments),
        _ => Err("Tool arguments must be a JSON object".into()),
    }
}

/// Executes every tag in `reply` and returns one `<mcp_result>` block per tag,
/// in order. Malformed tags are answered with an error block.
async fn run_reply(registry: &McpRegistry, reply: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    for parsed in extract_tool_calls(reply) {
        match parsed {
            Ok(call) => {
                for (call, result) in execute_tool_calls(registry, vec![call]).await {
                    blocks.push(format_tool_result(&call.tool, &result));
                }
            }
            Err(err) => {
                let result = ToolResult::error_text(err.to_string());
                blocks.push(format_tool_result("", &result));
            }
        }
    }
    blocks
}

fn format_server_list(config: &Config) -> String {
    let servers = config.list_mcp_servers();
    if servers.is_empty() {
        return "No MCP servers configured.\n".to_string();
    }

    let mut out = String::from("MCP servers:\n");
    for server in servers {
        let status = if server.enabled { "enabled" } else { "disabled" };
        let auth = if server.api_key.is_some() { ", token" } else { "" };
        out.push_str(&format!(
            "  {} ({}) {} [{}, {}{}]\n",
            server.id, server.name, server.url, server.transport, status, auth
        ));
    }
    out
}

fn format_registry_overview(registry: &McpRegistry) -> String {
    let states = registry.server_states();
    if states.is_empty() {
        return "No enabled MCP servers.\n".to_string();
    }

    let mut out = String::new();
    for (server_id, state) in states {
        out.push_str(&format!("{server_id}: {}", state.connection_state));
        if let Some(error) = &state.error {
            out.push_str(&format!(" ({error})"));
        }
        out.push('\n');
        if state.connection_state != ConnectionState::Connected {
            continue;
        }
        for tool in registry.get_tools_for_server(&server_id) {
            match tool.tool.description.as_deref() {
                Some(description) => {
                    out.push_str(&format!("  {}  {}\n", tool.qualified_name, description))
                }
                None => out.push_str(&format!("  {}\n", tool.qualified_name)),
            }
        }
    }
    out
}
