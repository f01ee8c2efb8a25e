//! Common test harness: a fake editor speaking the plugin wire protocol
//! over a Unix socket, and a fully started bridge pointed at it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

use gemini_ide_bridge::{BridgeConfig, IdeBridge, MCP_SESSION_HEADER};

/// A scripted editor peer. Auto-responds to `open_diff` and `close_diff`
/// and records every request the bridge sends.
pub struct FakeEditor {
    pub socket_path: PathBuf,
    push_tx: mpsc::UnboundedSender<String>,
    pub requests_rx: mpsc::UnboundedReceiver<Value>,
}

impl FakeEditor {
    pub async fn spawn(dir: &Path) -> Self {
        let socket_path = dir.join("editor.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
        let (req_tx, requests_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = stream.into_split();
            let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

            tokio::spawn(async move {
                while let Some(line) = line_rx.recv().await {
                    if write_half.write_all(line.as_bytes()).await.is_err()
                        || write_half.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                }
            });

            let push_forward = line_tx.clone();
            tokio::spawn(async move {
                while let Some(line) = push_rx.recv().await {
                    let _ = push_forward.send(line);
                }
            });

            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let _ = req_tx.send(msg.clone());
                if msg.get("id").is_some() {
                    let result = match msg.get("method").and_then(Value::as_str) {
                        Some("open_diff") => json!({}),
                        Some("close_diff") => json!({ "content": "edited text" }),
                        _ => Value::Null,
                    };
                    let reply = json!({ "jsonrpc": "2.0", "id": msg["id"], "result": result });
                    let _ = line_tx.send(reply.to_string());
                }
            }
        });

        Self {
            socket_path,
            push_tx,
            requests_rx,
        }
    }

    /// Push a notification toward the bridge, as the plugin would.
    pub fn emit(&self, method: &str, params: Value) {
        let msg = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let _ = self.push_tx.send(msg.to_string());
    }

    /// Next request the bridge sent to the editor.
    pub async fn next_request(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.requests_rx.recv())
            .await
            .expect("timed out waiting for editor request")
            .expect("editor request channel closed")
    }
}

/// A started bridge plus its fake editor and temp directories.
pub struct Harness {
    pub bridge: IdeBridge,
    pub editor: FakeEditor,
    pub discovery_dir: PathBuf,
    _tmp: tempfile::TempDir,
}

pub async fn start_bridge() -> Harness {
    start_bridge_with(|_| {}).await
}

/// Start a bridge with a config tweak; the discovery dir may be
/// pre-populated before the bridge runs its reaper.
pub async fn start_bridge_with(tweak: impl FnOnce(&mut BridgeConfig)) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let editor = FakeEditor::spawn(tmp.path()).await;
    let discovery_dir = tmp.path().join("discovery");

    let mut config = BridgeConfig {
        rpc_socket: editor.socket_path.clone(),
        workspace: PathBuf::from("/workspace"),
        editor: "neovim".to_owned(),
        debounce: Duration::from_millis(200),
        keep_alive: Duration::from_secs(60),
        trusted: true,
        discovery_dir: discovery_dir.clone(),
    };
    tweak(&mut config);

    let discovery_dir = config.discovery_dir.clone();
    let bridge = IdeBridge::start(config).await.unwrap();
    Harness {
        bridge,
        editor,
        discovery_dir,
        _tmp: tmp,
    }
}

impl Harness {
    /// Request builder with the loopback Host header and bearer token the
    /// gate chain expects.
    pub fn authed(&self, method: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri("/mcp")
            .header("host", format!("127.0.0.1:{}", self.bridge.port()))
            .header(
                "authorization",
                format!("Bearer {}", self.bridge.auth_token()),
            )
    }

    /// `POST /mcp` initialize, returning the new session id.
    pub async fn initialize_session(&self) -> String {
        use tower::util::ServiceExt;
        let request = self
            .authed("POST")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "jsonrpc": "2.0",
                    "id": 0,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": { "name": "test", "version": "0" }
                    }
                })
                .to_string(),
            ))
            .unwrap();
        let response = self.bridge.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);
        response
            .headers()
            .get(MCP_SESSION_HEADER)
            .expect("missing session header")
            .to_str()
            .unwrap()
            .to_owned()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Read the next SSE event payload from a streaming response body.
pub async fn next_sse_json(body: &mut axum::body::BodyDataStream) -> Value {
    let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("timed out waiting for SSE event")
        .expect("SSE stream ended")
        .expect("SSE stream errored");
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    let data = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap_or_else(|| panic!("no data line in SSE chunk: {:?}", text));
    serde_json::from_str(data).unwrap()
}
