//! End-to-end exercise of the MCP client against a minimal in-process tool
//! server: SSE stream with an endpoint advertisement, JSON-RPC over POST,
//! responses delivered asynchronously on the stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use omniagent_core::Error;
use omniagent_tools::{ConnectionStatus, McpClient};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

#[derive(Clone, Default)]
struct AppState {
    stream_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    // Advertise the command endpoint as the first event on the stream.
    let _ = tx.send(Event::default().event("endpoint").data("/messages"));
    *state.stream_tx.lock().await = Some(tx);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    });
    Sse::new(stream)
}

async fn post_handler(State(state): State<AppState>, Json(request): Json<Value>) -> StatusCode {
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    // Notifications carry no id and get no response.
    let Some(id) = request.get("id").and_then(|i| i.as_u64()) else {
        return StatusCode::ACCEPTED;
    };

    let result = match method {
        "initialize" => Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": { "name": "fake-tool-server", "version": "0.0.1" }
        })),
        "tools/list" => Some(json!({
            "tools": [{
                "name": "echo",
                "description": "Echo the message back",
                "inputSchema": {
                    "type": "object",
                    "properties": { "msg": { "type": "string" } }
                }
            }]
        })),
        "tools/call" => {
            let name = request
                .pointer("/params/name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if name == "black_hole" {
                // Swallow the request: the client must time out.
                None
            } else {
                let msg = request
                    .pointer("/params/arguments/msg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                Some(json!({
                    "content": [{ "type": "text", "text": format!("echo: {}", msg) }],
                    "isError": false
                }))
            }
        }
        _ => None,
    };

    if let Some(result) = result {
        if let Some(tx) = state.stream_tx.lock().await.as_ref() {
            let payload = json!({ "jsonrpc": "2.0", "id": id, "result": result });
            let _ = tx.send(Event::default().data(payload.to_string()));
        }
    }
    StatusCode::ACCEPTED
}

async fn start_fake_server() -> String {
    let app = Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(post_handler))
        .with_state(AppState::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/sse", addr)
}

#[tokio::test]
async fn handshake_catalog_and_call_roundtrip() {
    let sse_url = start_fake_server().await;
    let client = Arc::new(McpClient::new("fake", &sse_url, Duration::from_secs(5)));

    client.connect().await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);

    let tools = client.tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].description.as_deref(), Some("Echo the message back"));

    let result = client
        .call_tool("echo", json!({ "msg": "hello" }))
        .await
        .unwrap();
    assert_eq!(result, Value::String("echo: hello".to_string()));
}

#[tokio::test]
async fn unanswered_call_times_out() {
    let sse_url = start_fake_server().await;
    let client = Arc::new(McpClient::new("fake", &sse_url, Duration::from_millis(500)));

    client.connect().await.unwrap();

    let err = client
        .call_tool("black_hole", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got: {}", err);

    // The connection is still usable after the timeout.
    let result = client.call_tool("echo", json!({ "msg": "next" })).await.unwrap();
    assert_eq!(result, Value::String("echo: next".to_string()));
}
