use super::*;
use crate::mcp::client::HttpConnector;
use crate::mcp::protocol::{normalize_input_schema, InitializeResult, ToolResultContent};
use crate::mcp::state::ConnectionState;
use crate::mcp::test_support::{test_http_client, MockMcpServer};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;

fn tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: normalize_input_schema(None),
    }
}

/// Session answering from a fixed tool list; `fail_with` makes initialize fail.
struct FakeSession {
    tools: Vec<Tool>,
    fail_with: Option<String>,
    calls: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl McpSession for FakeSession {
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        match &self.fail_with {
            Some(message) => Err(McpError::Http {
                status: "503 Service Unavailable".to_string(),
                body: message.clone(),
            }),
            None => Ok(InitializeResult::default()),
        }
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Map<String, Value>,
    ) -> Result<ToolResult, McpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult {
            content: vec![ToolResultContent::Text {
                text: format!("ran {name}"),
            }],
            is_error: false,
        })
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector keyed by server id; unknown ids get an empty tool list.
#[derive(Default)]
struct FakeConnector {
    tools: HashMap<String, Vec<Tool>>,
    failing: HashMap<String, String>,
    calls: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    fn with_server(mut self, server_id: &str, tools: &[&str]) -> Self {
        self.tools.insert(
            server_id.to_string(),
            tools.iter().map(|name| tool(name)).collect(),
        );
        self
    }

    fn failing(mut self, server_id: &str, message: &str) -> Self {
        self.failing
            .insert(server_id.to_string(), message.to_string());
        self
    }
}

impl SessionConnector for FakeConnector {
    fn open(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        Ok(Arc::new(FakeSession {
            tools: self.tools.get(&config.id).cloned().unwrap_or_default(),
            fail_with: self.failing.get(&config.id).cloned(),
            calls: Arc::clone(&self.calls),
            closed: Arc::clone(&self.closed),
        }))
    }
}

fn config(id: &str, name: &str) -> ServerConfig {
    ServerConfig::new(id, name, format!("https://{id}.example/mcp"))
}

fn recording_subscriber(registry: &McpRegistry) -> Arc<Mutex<Vec<(String, ConnectionState)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    registry.on_state_change(move |server_id, state| {
        sink.lock()
            .expect("events lock")
            .push((server_id.to_string(), state.connection_state));
    });
    events
}

#[test]
fn slug_lowercases_and_replaces_non_alphanumerics() {
    assert_eq!(slug("Files"), "files");
    assert_eq!(slug("My Server-2.0"), "my_server_2_0");
    assert_eq!(slug("Ünï"), "_n_");
    assert_eq!(qualified_tool_name("Files", "read_file"), "mcp_files_read_file");
}

#[tokio::test]
async fn connect_registers_tools_and_publishes_transitions() {
    let registry = McpRegistry::new(Arc::new(
        FakeConnector::default().with_server("a", &["one", "two"]),
    ));
    let events = recording_subscriber(&registry);

    let registered = registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect should succeed");

    assert_eq!(registered.len(), 2);
    let state = registry.get_server_state("a");
    assert!(state.is_connected());
    assert_eq!(state.tools.len(), 2);
    assert_eq!(registry.get_tools_for_server("a").len(), 2);
    assert!(registry.is_mcp_tool("mcp_alpha_one"));
    assert!(!registry.is_mcp_tool("mcp_alpha_three"));
    assert!(!registry.is_mcp_tool("one"));
    assert_eq!(
        *events.lock().expect("events lock"),
        vec![
            ("a".to_string(), ConnectionState::Connecting),
            ("a".to_string(), ConnectionState::Connected),
        ]
    );
}

#[tokio::test]
async fn failed_connect_records_error_and_returns_it() {
    let registry = McpRegistry::new(Arc::new(
        FakeConnector::default().failing("down", "maintenance"),
    ));

    let err = registry
        .connect_server(config("down", "Down"))
        .await
        .expect_err("connect should fail");

    assert!(matches!(err, McpError::Http { .. }));
    let state = registry.get_server_state("down");
    assert_eq!(state.connection_state, ConnectionState::Error);
    assert!(state
        .error
        .as_deref()
        .is_some_and(|message| message.contains("maintenance")));
    assert!(registry.get_tools_for_server("down").is_empty());

    registry.disconnect_server("down").await;
    let state = registry.get_server_state("down");
    assert_eq!(state, ServerState::disconnected());
}

#[tokio::test]
async fn unknown_servers_report_disconnected() {
    let registry = McpRegistry::new(Arc::new(FakeConnector::default()));
    assert_eq!(registry.get_server_state("nobody"), ServerState::disconnected());
    assert!(registry.server_states().is_empty());
}

#[tokio::test]
async fn disconnect_removes_only_that_servers_tools() {
    let connector = FakeConnector::default()
        .with_server("a", &["one", "two"])
        .with_server("b", &["three"]);
    let closed = Arc::clone(&connector.closed);
    let registry = McpRegistry::new(Arc::new(connector));

    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect a");
    registry
        .connect_server(config("b", "Beta"))
        .await
        .expect("connect b");
    assert_eq!(registry.get_all_tools().len(), 3);

    registry.disconnect_server("a").await;

    let remaining = registry.get_all_tools();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].server_id, "b");
    assert!(registry.get_tools_for_server("a").is_empty());
    assert_eq!(
        registry.get_server_state("a").connection_state,
        ConnectionState::Disconnected
    );
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reconnecting_replaces_the_previous_registration() {
    let connector = FakeConnector::default().with_server("a", &["one", "two"]);
    let closed = Arc::clone(&connector.closed);
    let registry = McpRegistry::new(Arc::new(connector));

    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("first connect");
    registry
        .reconnect_server(config("a", "Alpha"))
        .await
        .expect("reconnect");

    assert_eq!(registry.get_all_tools().len(), 2);
    assert!(registry.is_mcp_tool("mcp_alpha_one"));
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect over live session");
    assert_eq!(registry.get_all_tools().len(), 2);
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn colliding_names_get_numeric_suffixes() {
    let registry = McpRegistry::new(Arc::new(
        FakeConnector::default()
            .with_server("a", &["search"])
            .with_server("b", &["search"])
            .with_server("c", &["search"]),
    ));

    for (id, name) in [("a", "My Server"), ("b", "my-server"), ("c", "MY SERVER")] {
        registry
            .connect_server(config(id, name))
            .await
            .expect("connect should succeed");
    }

    let names: Vec<String> = registry
        .get_all_tools()
        .into_iter()
        .map(|tool| tool.qualified_name)
        .collect();
    assert_eq!(
        names,
        vec![
            "mcp_my_server_search",
            "mcp_my_server_search_2",
            "mcp_my_server_search_3",
        ]
    );
    assert_eq!(
        registry
            .find_tool("mcp_my_server_search_2")
            .map(|tool| tool.server_id),
        Some("b".to_string())
    );
}

#[tokio::test]
async fn call_tool_routes_by_qualified_name() {
    let connector = FakeConnector::default().with_server("a", &["one"]);
    let calls = Arc::clone(&connector.calls);
    let registry = McpRegistry::new(Arc::new(connector));
    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect should succeed");

    let result = registry
        .call_tool("mcp_alpha_one", Map::new())
        .await
        .expect("call should succeed");
    assert_eq!(result.text(), "ran one");

    let err = registry
        .call_tool("mcp_alpha_nope", Map::new())
        .await
        .expect_err("unknown tool");
    assert!(matches!(err, McpError::UnknownTool(ref name) if name == "mcp_alpha_nope"));
    assert!(err.is_routing());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn call_tool_for_orphaned_entry_is_not_connected() {
    let registry = McpRegistry::new(Arc::new(FakeConnector::default().with_server("a", &["one"])));
    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect should succeed");
    registry.inner().sessions.remove("a");

    let err = registry
        .call_tool("mcp_alpha_one", Map::new())
        .await
        .expect_err("no session");
    assert!(matches!(err, McpError::ServerNotConnected(ref id) if id == "a"));
}

#[tokio::test]
async fn unknown_tool_fails_without_network() {
    let server = MockMcpServer::with_tools(json!([])).await;
    let registry = McpRegistry::new(Arc::new(HttpConnector::with_client(test_http_client())));

    let err = registry
        .call_tool("mcp_files_read_file", Map::new())
        .await
        .expect_err("unknown tool");

    assert!(err.is_routing());
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn panicking_subscriber_does_not_starve_later_ones() {
    let registry = McpRegistry::new(Arc::new(FakeConnector::default().with_server("a", &["one"])));
    registry.on_state_change(|_, _| panic!("subscriber failure"));
    let events = recording_subscriber(&registry);

    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect should survive a panicking subscriber");

    assert_eq!(events.lock().expect("events lock").len(), 2);
    assert!(registry.get_server_state("a").is_connected());
}

#[tokio::test]
async fn unsubscribed_callbacks_stop_receiving_events() {
    let registry = McpRegistry::new(Arc::new(FakeConnector::default()));
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let id = registry.on_state_change(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    registry.disconnect_server("x").await;
    assert!(registry.unsubscribe(id));
    assert!(!registry.unsubscribe(id));
    registry.disconnect_server("x").await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscribers_may_read_the_registry_reentrantly() {
    let registry = Arc::new(McpRegistry::new(Arc::new(
        FakeConnector::default().with_server("a", &["one"]),
    )));
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let weak = Arc::downgrade(&registry);
    registry.on_state_change(move |server_id, _| {
        if let Some(registry) = weak.upgrade() {
            sink.lock()
                .expect("observed lock")
                .push(registry.get_tools_for_server(server_id).len());
        }
    });

    registry
        .connect_server(config("a", "Alpha"))
        .await
        .expect("connect should succeed");

    assert_eq!(*observed.lock().expect("observed lock"), vec![0, 1]);
}

#[tokio::test]
async fn connect_all_skips_disabled_and_isolates_failures() {
    let registry = McpRegistry::new(Arc::new(
        FakeConnector::default()
            .with_server("a", &["one"])
            .with_server("c", &["two"])
            .failing("b", "down"),
    ));
    let mut disabled = config("d", "Disabled");
    disabled.enabled = false;

    let mut outcomes = registry
        .connect_all(vec![
            config("a", "Alpha"),
            config("b", "Beta"),
            config("c", "Gamma"),
            disabled,
        ])
        .await;
    outcomes.sort_by(|left, right| left.0.cmp(&right.0));

    let summary: Vec<(&str, bool)> = outcomes
        .iter()
        .map(|(id, outcome)| (id.as_str(), outcome.is_ok()))
        .collect();
    assert_eq!(summary, vec![("a", true), ("b", false), ("c", true)]);
    assert_eq!(registry.get_all_tools().len(), 2);
    let states: Vec<(String, ConnectionState)> = registry
        .server_states()
        .into_iter()
        .map(|(id, state)| (id, state.connection_state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("a".to_string(), ConnectionState::Connected),
            ("b".to_string(), ConnectionState::Error),
            ("c".to_string(), ConnectionState::Connected),
        ]
    );

    registry.disconnect_all().await;
    assert!(registry.get_all_tools().is_empty());
    assert!(registry
        .server_states()
        .iter()
        .all(|(_, state)| state.connection_state == ConnectionState::Disconnected));
}

#[tokio::test]
async fn manifest_is_empty_without_tools() {
    let registry = McpRegistry::new(Arc::new(FakeConnector::default()));
    assert_eq!(registry.generate_tool_manifest(), "");
}

#[tokio::test]
async fn files_server_end_to_end() {
    let server = MockMcpServer::with_tools(json!([{
        "name": "read_file",
        "description": "Read a file from disk",
        "inputSchema": {
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        }
    }]))
    .await;
    let registry = McpRegistry::new(Arc::new(HttpConnector::with_client(test_http_client())));
    let config = ServerConfig::new("s1", "Files", server.url());

    let registered = registry
        .connect_server(config)
        .await
        .expect("connect should succeed");

    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].qualified_name, "mcp_files_read_file");
    assert_eq!(registered[0].server_url, server.url());

    let manifest = registry.generate_tool_manifest();
    assert_eq!(manifest.matches("\n## Files ").count(), 1);
    assert_eq!(manifest.matches("### mcp_files_read_file").count(), 1);
    assert!(manifest.contains("path: string (required)"));

    let mut arguments = Map::new();
    arguments.insert("path".to_string(), json!("/etc/hosts"));
    let result = registry
        .call_tool("mcp_files_read_file", arguments)
        .await
        .expect("call should succeed");
    assert_eq!(result.text(), "called read_file");

    assert_eq!(
        server.methods(),
        vec![
            "initialize",
            "notifications/initialized",
            "tools/list",
            "tools/call"
        ]
    );
    let call = server.requests().pop().expect("call recorded");
    assert_eq!(call.body["params"]["arguments"]["path"], json!("/etc/hosts"));
}

#[tokio::test]
async fn two_http_servers_then_disconnect_one() {
    let alpha = MockMcpServer::with_tools(json!([{"name": "one"}, {"name": "two"}])).await;
    let beta = MockMcpServer::with_tools(json!([{"name": "three"}])).await;
    let registry = McpRegistry::new(Arc::new(HttpConnector::with_client(test_http_client())));

    registry
        .connect_server(ServerConfig::new("a", "Alpha", alpha.url()))
        .await
        .expect("connect alpha");
    registry
        .connect_server(ServerConfig::new("b", "Beta", beta.url()))
        .await
        .expect("connect beta");
    assert_eq!(registry.get_all_tools().len(), 3);

    registry.disconnect_server("a").await;

    let remaining = registry.get_all_tools();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].server_id, "b");
    assert_eq!(remaining[0].qualified_name, "mcp_beta_three");
}
