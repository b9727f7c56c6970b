use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use omniagent_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::pending::PendingCalls;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "omniagent";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// ─── Tool schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

// ─── MCP client ──────────────────────────────────────────────────────────────

/// One connection to an MCP tool server: a persistent SSE stream for
/// server-to-client traffic plus HTTP POST to the endpoint the stream
/// advertises. Responses are matched to requests through [`PendingCalls`].
pub struct McpClient {
    name: String,
    sse_url: String,
    post_url: Mutex<Option<String>>,
    status: Arc<StdMutex<ConnectionStatus>>,
    tools: Mutex<Vec<McpTool>>,
    next_id: AtomicU64,
    pending: Arc<PendingCalls>,
    http: reqwest::Client,
    rpc_timeout: Duration,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    pub fn new(name: &str, sse_url: &str, rpc_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            sse_url: sse_url.to_string(),
            post_url: Mutex::new(None),
            status: Arc::new(StdMutex::new(ConnectionStatus::Disconnected)),
            tools: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pending: Arc::new(PendingCalls::new()),
            http: reqwest::Client::new(),
            rpc_timeout,
            reader: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    /// Open the SSE stream, wait for the endpoint advertisement, perform the
    /// capability handshake and fetch the tool catalog.
    ///
    /// Any failure leaves the connection in the error state; recovery is
    /// caller-initiated, never automatic.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.status() == ConnectionStatus::Connected {
            return Ok(());
        }
        self.set_status(ConnectionStatus::Connecting);
        info!(server = %self.name, url = %self.sse_url, "connecting to tool server");

        let response = self
            .http
            .get(&self.sse_url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| self.fail(format!("MCP[{}]: connect failed: {}", self.name, e)))?;
        if !response.status().is_success() {
            return Err(self.fail(format!(
                "MCP[{}]: SSE HTTP error: {}",
                self.name,
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(reader_task(
            self.name.clone(),
            self.pending.clone(),
            self.status.clone(),
            response,
            endpoint_tx,
        ));
        *self.reader.lock().expect("reader lock poisoned") = Some(reader);

        let endpoint = tokio::time::timeout(self.rpc_timeout, endpoint_rx)
            .await
            .map_err(|_| {
                self.fail(format!("MCP[{}]: no endpoint advertisement", self.name))
            })?
            .map_err(|_| {
                self.fail(format!(
                    "MCP[{}]: stream closed before endpoint advertisement",
                    self.name
                ))
            })?;
        let post_url = resolve_endpoint(&self.sse_url, &endpoint)?;
        debug!(server = %self.name, endpoint = %post_url, "command endpoint received");
        *self.post_url.lock().await = Some(post_url);

        if let Err(e) = self.initialize().await {
            self.set_status(ConnectionStatus::Error);
            return Err(e);
        }
        if let Err(e) = self.refresh_tools().await {
            self.set_status(ConnectionStatus::Error);
            return Err(e);
        }
        self.set_status(ConnectionStatus::Connected);
        info!(server = %self.name, "tool server connected");
        Ok(())
    }

    /// Tear the connection down and discard its state.
    pub async fn disconnect(&self) {
        if let Some(reader) = self.reader.lock().expect("reader lock poisoned").take() {
            reader.abort();
        }
        *self.post_url.lock().await = None;
        self.tools.lock().await.clear();
        self.pending.fail_all("connection closed").await;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn fail(&self, message: String) -> Error {
        self.set_status(ConnectionStatus::Error);
        Error::Tool(message)
    }

    /// Send a correlated JSON-RPC request and await its response from the
    /// stream. Times out after the configured window, discarding the
    /// correlation entry.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let post_url = self.post_url.lock().await.clone().ok_or_else(|| {
            Error::Tool(format!("MCP[{}]: no command endpoint established", self.name))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let waiter = self.pending.register(id).await;
        let payload = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        debug!(server = %self.name, id, method, "MCP → request");

        let posted = self.http.post(&post_url).json(&payload).send().await;
        match posted {
            Ok(r) if r.status().is_success() => {}
            Ok(r) => {
                self.pending.discard(id).await;
                return Err(Error::Tool(format!(
                    "MCP[{}]: POST error: {}",
                    self.name,
                    r.status()
                )));
            }
            Err(e) => {
                self.pending.discard(id).await;
                return Err(Error::Tool(format!("MCP[{}]: POST failed: {}", self.name, e)));
            }
        }

        self.pending
            .wait(id, waiter, self.rpc_timeout)
            .await
            .map_err(|e| match e {
                Error::Timeout(_) => {
                    Error::Timeout(format!("MCP[{}]: {} timed out", self.name, method))
                }
                other => other,
            })
    }

    /// Fire-and-forget notification: no id, no response expected.
    async fn notify(&self, method: &str) {
        let Some(post_url) = self.post_url.lock().await.clone() else {
            return;
        };
        let payload = json!({ "jsonrpc": "2.0", "method": method });
        if let Err(e) = self.http.post(&post_url).json(&payload).send().await {
            warn!(server = %self.name, method, error = %e, "MCP notification failed");
        }
    }

    /// Capability handshake followed by the initialized notification.
    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": false },
                "sampling": {}
            },
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": CLIENT_VERSION
            }
        });
        let result = self.request("initialize", Some(params)).await?;
        debug!(server = %self.name, info = ?result.get("serverInfo"), "MCP initialized");

        self.notify("notifications/initialized").await;
        Ok(())
    }

    /// Fetch tools/list and cache the catalog.
    pub async fn refresh_tools(&self) -> Result<()> {
        let result = self.request("tools/list", None).await?;
        let tools: Vec<McpTool> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| Error::Tool(format!("MCP[{}]: parse tools: {}", self.name, e)))?;
        debug!(server = %self.name, count = tools.len(), "MCP tools loaded");
        *self.tools.lock().await = tools;
        Ok(())
    }

    pub async fn tools(&self) -> Vec<McpTool> {
        self.tools.lock().await.clone()
    }

    /// Invoke tools/call. An `isError` result surfaces as a tool error; text
    /// content blocks are flattened into one string.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let params = json!({
            "name": tool_name,
            "arguments": arguments
        });
        let result = self.request("tools/call", Some(params)).await?;

        if let Some(true) = result.get("isError").and_then(|v| v.as_bool()) {
            let msg = result
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("tool returned an error");
            return Err(Error::Tool(msg.to_string()));
        }

        let content = result.get("content").cloned().unwrap_or(Value::Null);
        if let Some(arr) = content.as_array() {
            let text: String = arr
                .iter()
                .filter_map(|item| {
                    if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                        item.get("text").and_then(|t| t.as_str()).map(String::from)
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                return Ok(Value::String(text));
            }
        }
        Ok(content)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.pending
    }
}

fn resolve_endpoint(sse_url: &str, endpoint: &str) -> Result<String> {
    let base = Url::parse(sse_url)
        .map_err(|e| Error::Tool(format!("invalid SSE url '{}': {}", sse_url, e)))?;
    let resolved = base
        .join(endpoint)
        .map_err(|e| Error::Tool(format!("invalid endpoint '{}': {}", endpoint, e)))?;
    Ok(resolved.to_string())
}

/// Reads the SSE stream, routing the endpoint advertisement to the waiting
/// connect call and JSON-RPC responses to their correlation entries. Stream
/// termination fails every pending call and marks the connection errored.
async fn reader_task(
    name: String,
    pending: Arc<PendingCalls>,
    status: Arc<StdMutex<ConnectionStatus>>,
    mut response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut partial = String::new();
    let mut event_name = String::new();
    let mut event_data = String::new();

    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                partial.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = partial.find('\n') {
                    let line = partial[..pos].trim_end_matches('\r').to_string();
                    partial = partial[pos + 1..].to_string();

                    if line.is_empty() {
                        if !event_data.is_empty() {
                            dispatch_event(
                                &name,
                                &pending,
                                &mut endpoint_tx,
                                &event_name,
                                event_data.trim(),
                            )
                            .await;
                        }
                        event_name.clear();
                        event_data.clear();
                    } else if let Some(rest) = line.strip_prefix("event:") {
                        event_name = rest.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        if !event_data.is_empty() {
                            event_data.push('\n');
                        }
                        event_data.push_str(rest.trim_start());
                    }
                }
            }
            Ok(None) => {
                error!(server = %name, "MCP stream closed");
                break;
            }
            Err(e) => {
                error!(server = %name, error = %e, "MCP stream error");
                break;
            }
        }
    }

    *status.lock().expect("status lock poisoned") = ConnectionStatus::Error;
    pending.fail_all("stream closed").await;
}

async fn dispatch_event(
    name: &str,
    pending: &PendingCalls,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
    event: &str,
    data: &str,
) {
    if event == "endpoint" {
        if let Some(tx) = endpoint_tx.take() {
            let _ = tx.send(data.to_string());
        }
        return;
    }

    match serde_json::from_str::<JsonRpcResponse>(data) {
        Ok(resp) => {
            if let Some(id) = resp.id {
                let payload = if let Some(err) = resp.error {
                    Err(format!("JSON-RPC error {}: {}", err.code, err.message))
                } else {
                    Ok(resp.result.unwrap_or(Value::Null))
                };
                if !pending.resolve(id, payload).await {
                    debug!(server = %name, id, "response for unknown request id");
                }
            }
            // Notifications (no id) are silently ignored.
        }
        Err(e) => {
            warn!(server = %name, error = %e, "MCP: failed to parse stream message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_resolution_handles_relative_and_absolute() {
        assert_eq!(
            resolve_endpoint("http://localhost:9000/sse", "/messages?session=1").unwrap(),
            "http://localhost:9000/messages?session=1"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:9000/sse", "http://other:1/post").unwrap(),
            "http://other:1/post"
        );
    }

    #[test]
    fn new_client_starts_disconnected() {
        let client = McpClient::new("docs", "http://localhost:9000/sse", Duration::from_secs(10));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn request_without_endpoint_fails_without_network() {
        let client = Arc::new(McpClient::new(
            "docs",
            "http://localhost:9000/sse",
            Duration::from_secs(10),
        ));
        let err = client.request("tools/list", None).await.unwrap_err();
        assert!(err.to_string().contains("no command endpoint"));
        assert_eq!(client.pending().len().await, 0);
    }
}
