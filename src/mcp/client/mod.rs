//! Per-server MCP protocol client.
//!
//! An [`McpClient`] owns exactly one session with one server: it performs the
//! initialize handshake, lists tools and invokes them. It knows nothing about
//! other servers; routing across servers is the registry's job.

use crate::core::config::data::{HttpSettings, ServerConfig};
use crate::mcp::error::McpError;
use crate::mcp::protocol::{
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, Tool,
    ToolResult, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp::transport::streamable_http::{is_event_stream_content_type, read_sse_response};
use crate::mcp::transport::{
    apply_auth_header, apply_client_post_headers, apply_session_header, build_mcp_http_client,
    content_type_of, session_id_from_response, McpTransportKind,
};
use async_trait::async_trait;
use rust_mcp_schema::{Implementation, LATEST_PROTOCOL_VERSION};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const FIRST_REQUEST_ID: i64 = 1;
const MCP_MAX_TOOL_PAGES: usize = 50;

/// The operations the registry needs from one live server session.
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn initialize(&self) -> Result<InitializeResult, McpError>;

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, McpError>;

    /// Local teardown only; nothing is sent to the server.
    async fn close(&self);
}

/// Opens a fresh, not yet initialized session for a server config.
pub trait SessionConnector: Send + Sync {
    fn open(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError>;
}

/// Connector producing HTTP clients that share one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    http_client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(settings: &HttpSettings) -> Result<Self, McpError> {
        Ok(Self {
            http_client: build_mcp_http_client(settings)?,
        })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

impl SessionConnector for HttpConnector {
    fn open(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        config.validate().map_err(McpError::InvalidConfig)?;
        Ok(Arc::new(McpClient::new(config, self.http_client.clone())))
    }
}

pub struct McpClient {
    server_id: String,
    url: String,
    transport: McpTransportKind,
    api_key: Option<String>,
    http_client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    next_request_id: AtomicI64,
    server_details: Mutex<Option<InitializeResult>>,
}

impl McpClient {
    pub fn new(config: &ServerConfig, http_client: reqwest::Client) -> Self {
        Self {
            server_id: config.id.clone(),
            url: config.url.trim().to_string(),
            transport: config.transport,
            api_key: config.api_key.clone(),
            http_client,
            session_id: Mutex::new(None),
            next_request_id: AtomicI64::new(FIRST_REQUEST_ID),
            server_details: Mutex::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// What the server reported during `initialize`, once it succeeded.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_details
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn remember_session(&self, response: &reqwest::Response) {
        if let Some(session_id) = session_id_from_response(response) {
            let mut current = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() != Some(session_id.as_str()) {
                debug!(server_id = %self.server_id, session_id = %session_id, "MCP session id issued");
                *current = Some(session_id);
            }
        }
    }

    fn post(&self, payload: String) -> reqwest::RequestBuilder {
        let session_id = self.session_id();
        let request = apply_client_post_headers(self.http_client.post(&self.url));
        let request = apply_auth_header(request, self.api_key.as_deref());
        apply_session_header(request, session_id.as_deref()).body(payload)
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<JsonRpcResponse, McpError> {
        let request_id = self.next_request_id();
        let payload = serde_json::to_string(&JsonRpcRequest::new(request_id, method, params))?;
        debug!(
            server_id = %self.server_id,
            url = %self.url,
            transport = %self.transport,
            request_id,
            method,
            "Sending MCP HTTP request"
        );

        let response = self.post(payload).send().await?;
        self.remember_session(&response);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.to_string(),
                body,
            });
        }

        let content_type = content_type_of(&response);
        if is_event_stream_content_type(&content_type) {
            read_sse_response(response, request_id).await
        } else {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice::<JsonRpcResponse>(&body)?)
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        debug!(server_id = %self.server_id, method, "Sending MCP notification");

        let response = self.post(payload).send().await?;
        self.remember_session(&response);

        match response.status().as_u16() {
            200 | 202 | 204 => Ok(()),
            _ => Err(McpError::UnexpectedNotificationStatus(
                response.status().to_string(),
            )),
        }
    }

    async fn fetch_tools_page(&self, cursor: Option<&str>) -> Result<ListToolsResult, McpError> {
        let params = match cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };
        self.send_request(METHOD_TOOLS_LIST, params)
            .await?
            .into_typed::<ListToolsResult>()
    }
}

fn client_details() -> Value {
    let client_info = Implementation {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        title: Some("MCP Bridge".to_string()),
        description: None,
        icons: Vec::new(),
        website_url: None,
    };
    json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": client_info,
    })
}

#[async_trait]
impl McpSession for McpClient {
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let result = self
            .send_request(METHOD_INITIALIZE, client_details())
            .await?
            .into_typed::<InitializeResult>()?;

        debug!(
            server_id = %self.server_id,
            protocol_version = %result.protocol_version,
            server_name = result.server_info.as_ref().map(|info| info.name.as_str()).unwrap_or("<unnamed>"),
            "MCP session initialized"
        );
        *self
            .server_details
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());

        if let Err(err) = self.send_notification(METHOD_INITIALIZED, None).await {
            warn!(server_id = %self.server_id, error = %err, "MCP initialized notification failed");
        }

        Ok(result)
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let mut page = self.fetch_tools_page(None).await?;
        let mut seen_cursors = HashSet::new();
        let mut tools = Vec::new();

        for _ in 0..MCP_MAX_TOOL_PAGES {
            let next_cursor = page.next_cursor.take();
            tools.extend(page.into_tools());

            let Some(cursor) = next_cursor.filter(|cursor| !cursor.is_empty()) else {
                return Ok(tools);
            };
            if !seen_cursors.insert(cursor.clone()) {
                warn!(server_id = %self.server_id, cursor = %cursor, "MCP tools/list cursor repeated");
                return Ok(tools);
            }
            page = self.fetch_tools_page(Some(&cursor)).await?;
        }

        warn!(server_id = %self.server_id, "MCP tools/list page limit reached");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.send_request(METHOD_TOOLS_CALL, params)
            .await?
            .into_typed::<ToolResult>()
    }

    async fn close(&self) {
        *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.next_request_id.store(FIRST_REQUEST_ID, Ordering::SeqCst);
        debug!(server_id = %self.server_id, "MCP client closed");
    }
}
