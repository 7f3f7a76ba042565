use crate::mcp::error::McpError;
use crate::mcp::protocol::{response_id_matches, JsonRpcResponse};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            if let Some(line) = decode_line(&self.buffer[search_index..line_end]) {
                lines.push(line);
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Some(line) = decode_line(&self.buffer[search_index..]) {
                lines.push(line);
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Reads an event-stream reply until the response for `request_id` shows up.
///
/// Messages for other ids, server notifications and undecodable data lines
/// are skipped. The stream is abandoned as soon as the match is found.
pub async fn read_sse_response(
    response: reqwest::Response,
    request_id: i64,
) -> Result<JsonRpcResponse, McpError> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for line in buffer.push(&chunk) {
            if let Some(response) = match_sse_line(&line, request_id)? {
                return Ok(response);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(response) = match_sse_line(&line, request_id)? {
            return Ok(response);
        }
    }

    Err(McpError::NoMatchingResponse { request_id })
}

fn match_sse_line(line: &str, request_id: i64) -> Result<Option<JsonRpcResponse>, McpError> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }

    let message = match serde_json::from_str::<Value>(payload) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "Skipping undecodable MCP event-stream line");
            return Ok(None);
        }
    };

    if !response_id_matches(&message, request_id) {
        debug!(request_id, "Skipping unrelated MCP event-stream message");
        return Ok(None);
    }

    Ok(Some(serde_json::from_value::<JsonRpcResponse>(message)?))
}
