//! In-process HTTP server used by the MCP client and registry tests.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn method(&self) -> &str {
        self.body
            .get("method")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
    }

    pub fn id(&self) -> Option<i64> {
        self.body.get("id").and_then(|value| value.as_i64())
    }
}

pub(crate) struct MockResponse {
    status: &'static str,
    headers: Vec<(String, String)>,
    body: String,
}

impl MockResponse {
    pub fn json(body: Value) -> Self {
        Self {
            status: "200 OK",
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    /// JSON-RPC success answering the recorded request's id.
    pub fn result(request: &RecordedRequest, result: Value) -> Self {
        Self::json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request.id(),
            "result": result,
        }))
    }

    pub fn event_stream(body: impl Into<String>) -> Self {
        Self {
            status: "200 OK",
            headers: vec![(
                "content-type".to_string(),
                "text/event-stream; charset=utf-8".to_string(),
            )],
            body: body.into(),
        }
    }

    pub fn accepted() -> Self {
        Self {
            status: "202 Accepted",
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn status(status: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn render(&self) -> String {
        let mut head = format!("HTTP/1.1 {}\r\n", self.status);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!(
            "content-length: {}\r\nconnection: close\r\n\r\n",
            self.body.len()
        ));
        head + &self.body
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

/// Accepts connections until dropped, answering each request via `handler`.
pub(crate) struct MockMcpServer {
    url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockMcpServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let Ok(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                let response = handler(&request);
                recorded.lock().expect("requests lock").push(request);
                let _ = stream.write_all(response.render().as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            url: format!("http://{addr}/mcp"),
            requests,
            task,
        }
    }

    /// Serves a fixed tool list over the full handshake.
    pub async fn with_tools(tools: Value) -> Self {
        Self::start(move |request| match request.method() {
            "initialize" => MockResponse::result(
                request,
                serde_json::json!({
                    "protocolVersion": "2025-11-25",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock", "version": "0.1.0"}
                }),
            ),
            "notifications/initialized" => MockResponse::accepted(),
            "tools/list" => MockResponse::result(request, serde_json::json!({ "tools": tools })),
            "tools/call" => MockResponse::result(
                request,
                serde_json::json!({
                    "content": [{"type": "text", "text": format!("called {}", request.body["params"]["name"].as_str().unwrap_or_default())}],
                    "isError": false
                }),
            ),
            _ => MockResponse::status("404 Not Found", "unknown method"),
        })
        .await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.method().to_string())
            .collect()
    }
}

impl Drop for MockMcpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// HTTP client that never routes the loopback mock through a proxy.
pub(crate) fn test_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("http client should build")
}

async fn read_http_request(stream: &mut TcpStream) -> Result<RecordedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|err| err.to_string())?
    };

    Ok(RecordedRequest {
        request_line,
        headers,
        body,
    })
}
