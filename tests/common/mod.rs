//! Shared test utilities for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use a2a_task_client::config::{ClientConfig, NoAuth};
use a2a_task_client::events::ClientEvent;
use a2a_task_client::{ClientState, TaskClient};

/// One scripted answer for a JSON-RPC method.
#[derive(Clone)]
pub enum Reply {
    /// A JSON-RPC success envelope around this result value.
    Result(Value),
    /// A JSON-RPC error envelope.
    RpcError { code: i64, message: String },
    /// A raw HTTP failure, no JSON-RPC envelope.
    HttpError(u16),
    /// An SSE response whose body carries these frames back to back.
    Stream(Vec<Value>),
}

struct MockState {
    card: Value,
    card_status: Mutex<Option<u16>>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
}

impl MockState {
    fn next_reply(&self, method: &str) -> Option<Reply> {
        let queued = self
            .replies
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());
        queued.or_else(|| self.defaults.lock().unwrap().get(method).cloned())
    }
}

/// A scripted A2A agent: serves the card and answers JSON-RPC methods from
/// per-method reply queues.
pub struct MockAgent {
    addr: SocketAddr,
    state: Arc<MockState>,
    _server: tokio::task::JoinHandle<()>,
}

impl MockAgent {
    /// Start a mock agent on a random port.
    pub async fn start(streaming: bool) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let card = json!({
            "name": "Mock Agent",
            "url": format!("http://{}/rpc", addr),
            "version": "0.1.0",
            "capabilities": { "streaming": streaming }
        });
        let state = Arc::new(MockState {
            card,
            card_status: Mutex::new(None),
            replies: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/.well-known/agent.json", get(agent_card))
            .route("/rpc", post(rpc))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Brief wait for the server to start accepting connections.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            state,
            _server: server,
        }
    }

    /// Base URL the client should be pointed at.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make the agent card route return this HTTP status instead of a card.
    pub fn fail_card(&self, status: u16) {
        *self.state.card_status.lock().unwrap() = Some(status);
    }

    /// Queue a successful result for one call of `method`.
    pub fn enqueue_result(&self, method: &str, result: Value) {
        self.enqueue(method, Reply::Result(result));
    }

    /// Queue a JSON-RPC error for one call of `method`.
    pub fn enqueue_rpc_error(&self, method: &str, code: i64, message: &str) {
        self.enqueue(
            method,
            Reply::RpcError {
                code,
                message: message.to_string(),
            },
        );
    }

    /// Queue a raw HTTP failure for one call of `method`.
    pub fn enqueue_http_error(&self, method: &str, status: u16) {
        self.enqueue(method, Reply::HttpError(status));
    }

    /// Queue an SSE stream carrying `frames` for one call of `method`.
    pub fn enqueue_stream(&self, method: &str, frames: Vec<Value>) {
        self.enqueue(method, Reply::Stream(frames));
    }

    /// Set the fallback answer used when a method's queue is empty.
    pub fn set_default(&self, method: &str, reply: Reply) {
        self.state
            .defaults
            .lock()
            .unwrap()
            .insert(method.to_string(), reply);
    }

    fn enqueue(&self, method: &str, reply: Reply) {
        self.state
            .replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    /// How many times `method` was called.
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }
}

async fn agent_card(State(state): State<Arc<MockState>>) -> Response {
    if let Some(status) = *state.card_status.lock().unwrap() {
        return (
            StatusCode::from_u16(status).unwrap(),
            "card unavailable",
        )
            .into_response();
    }
    Json(state.card.clone()).into_response()
}

async fn rpc(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let id = request["id"].clone();
    state.calls.lock().unwrap().push(method.clone());

    match state.next_reply(&method) {
        Some(Reply::Result(result)) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        }))
        .into_response(),
        Some(Reply::RpcError { code, message }) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .into_response(),
        Some(Reply::HttpError(status)) => {
            (StatusCode::from_u16(status).unwrap(), "scripted failure").into_response()
        }
        Some(Reply::Stream(frames)) => {
            let mut body = String::new();
            for frame in frames {
                body.push_str("data: ");
                body.push_str(&frame.to_string());
                body.push_str("\n\n");
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from(body))
                .unwrap()
        }
        None => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("no script for {method}") }
        }))
        .into_response(),
    }
}

// ---------------------------------------------------------------------------
// JSON builders
// ---------------------------------------------------------------------------

/// A task snapshot with just a status.
pub fn task(id: &str, state: &str) -> Value {
    json!({
        "id": id,
        "status": { "state": state }
    })
}

/// A task snapshot carrying artifacts.
pub fn task_with_artifacts(id: &str, state: &str, artifacts: Vec<Value>) -> Value {
    json!({
        "id": id,
        "status": { "state": state },
        "artifacts": artifacts
    })
}

/// A single-text-part artifact at `index`.
pub fn artifact(index: u32, text: &str) -> Value {
    json!({
        "index": index,
        "parts": [{ "type": "text", "text": text }]
    })
}

/// A stream frame signaling a status change.
pub fn frame_status(state: &str, is_final: bool) -> Value {
    json!({
        "status": { "state": state },
        "final": is_final
    })
}

/// A stream frame signaling an artifact change.
pub fn frame_artifact(index: u32, text: &str, is_final: bool) -> Value {
    json!({
        "artifact": artifact(index, text),
        "final": is_final
    })
}

// ---------------------------------------------------------------------------
// Client-side helpers
// ---------------------------------------------------------------------------

/// Config with test-friendly timings: fast polls, fast reconnects, short
/// coalesce window.
pub fn fast_config() -> ClientConfig {
    ClientConfig::new(Arc::new(NoAuth))
        .with_poll_interval(Duration::from_millis(40))
        .with_poll_max_error_attempts(2)
        .with_sse_max_reconnect_attempts(2)
        .with_sse_reconnect_delays(Duration::from_millis(10), Duration::from_millis(40))
        .with_sse_coalesce_window(Duration::from_millis(20))
        .with_request_timeout(Duration::from_secs(5))
}

/// Drain events until the `close` event arrives (inclusive), failing the
/// test if it does not arrive within 10 seconds.
pub async fn collect_until_close(events: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut collected = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            let is_close = matches!(event, ClientEvent::Close { .. });
            collected.push(event);
            if is_close {
                break;
            }
        }
    })
    .await
    .expect("no close event within 10s");
    collected
}

/// Compact labels for asserting event sequences. Coarse `task-update`
/// events are omitted; they accompany every applied snapshot and are
/// asserted separately where they matter.
pub fn labels(events: &[ClientEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::StatusUpdate { status, .. } => {
                Some(format!("status:{}", status.state))
            }
            ClientEvent::ArtifactUpdate {
                artifact, removed, ..
            } => Some(if *removed {
                format!("artifact-removed:{}", artifact.index)
            } else {
                format!("artifact:{}", artifact.index)
            }),
            ClientEvent::TaskUpdate { .. } => None,
            ClientEvent::Error { context, .. } => Some(format!("error:{context}")),
            ClientEvent::Close { reason } => Some(format!("close:{reason}")),
        })
        .collect()
}

/// Spin until the client reports `want`, failing the test after 5 seconds.
pub async fn wait_for_state(client: &TaskClient, want: ClientState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if client.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want}, got {}", client.state()));
}
