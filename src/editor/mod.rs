//! Editor RPC adapter
//!
//! Attaches to the editor plugin over a Unix domain socket carrying
//! newline-delimited JSON-RPC 2.0. Inbound notifications are validated into
//! [`EditorEvent`]s and fanned out on a broadcast channel, synchronously on
//! the reader task; debouncing happens downstream in the context
//! aggregator. Outbound calls (`open_diff`, `close_diff`) are matched to
//! responses through a pending-request map.

mod protocol;

pub use protocol::{EditorEvent, PROC_CLOSE_DIFF, PROC_OPEN_DIFF};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::{BridgeError, Result};
use crate::rpc;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const WRITE_QUEUE_CAPACITY: usize = 64;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>;

/// Handle to the editor RPC channel. Cheap to clone.
#[derive(Clone)]
pub struct EditorConnection {
    inner: Arc<EditorInner>,
}

struct EditorInner {
    events_tx: broadcast::Sender<EditorEvent>,
    writer_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed_rx: watch::Receiver<bool>,
}

impl EditorConnection {
    /// Connect to the editor's RPC socket and start the reader and writer
    /// tasks. Attach failure is fatal to the caller.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|source| BridgeError::EditorAttach {
                path: socket_path.to_path_buf(),
                source,
            })?;
        tracing::info!("Attached to editor RPC socket at {}", socket_path.display());

        let (read_half, mut write_half) = stream.into_split();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(WRITE_QUEUE_CAPACITY);
        let (closed_tx, closed_rx) = watch::channel(false);

        let inner = Arc::new(EditorInner {
            events_tx,
            writer_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed_rx,
        });

        // Writer task: drains the outbound queue onto the socket.
        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    tracing::warn!("Editor socket write failed, stopping writer");
                    break;
                }
            }
        });

        // Reader task: one JSON object per line.
        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => reader_inner.handle_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Editor socket read error: {}", e);
                        break;
                    }
                }
            }
            tracing::info!("Editor RPC connection closed");
            reader_inner.fail_pending("editor connection closed");
            let _ = closed_tx.send(true);
        });

        Ok(Self { inner })
    }

    /// Subscribe to the validated event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Resolves when the editor side closes the socket.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Ask the editor to open a diff view for `file_path` showing
    /// `new_content` against the buffer.
    pub async fn open_diff(&self, file_path: &Path, new_content: &str) -> Result<()> {
        self.request(
            PROC_OPEN_DIFF,
            serde_json::json!({
                "filePath": file_path,
                "newContent": new_content,
            }),
        )
        .await
        .map(|_| ())
    }

    /// Ask the editor to close the diff view for `file_path`, returning the
    /// edited content, or `None` when no such diff was open.
    pub async fn close_diff(&self, file_path: &Path) -> Result<Option<String>> {
        let result = self
            .request(PROC_CLOSE_DIFF, serde_json::json!({ "filePath": file_path }))
            .await?;
        Ok(result
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let line = rpc::request(id, method, params).to_string();
        if self.inner.writer_tx.send(line).await.is_err() {
            self.inner.pending.lock().remove(&id);
            return Err(BridgeError::EditorClosed);
        }

        // Waiting only on the oneshot would hang if the reader drained the
        // pending map just before this entry was inserted, so the close
        // signal is raced against the response.
        let mut closed = self.inner.closed_rx.clone();
        let until_closed = async move {
            while !*closed.borrow() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::select! {
            outcome = rx => match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(message)) => Err(BridgeError::EditorRpc { message }),
                Err(_) => Err(BridgeError::EditorClosed),
            },
            _ = until_closed => {
                self.inner.pending.lock().remove(&id);
                Err(BridgeError::EditorClosed)
            }
        }
    }
}

impl EditorInner {
    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Dropping unparseable editor line: {}", e);
                return;
            }
        };

        // Response to one of our calls.
        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
            if msg.get("result").is_some() || msg.get("error").is_some() {
                self.resolve(id, &msg);
                return;
            }
        }

        // Notification from the plugin.
        if let Some(method) = msg.get("method").and_then(Value::as_str) {
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            match EditorEvent::parse(method, &params) {
                Some(event) => {
                    // No receivers yet is fine; events before the first
                    // subscriber carry no context worth replaying.
                    let _ = self.events_tx.send(event);
                }
                None => {
                    tracing::debug!("Dropping editor notification {:?}", method);
                }
            }
        }
    }

    fn resolve(&self, id: u64, msg: &Value) {
        let Some(tx) = self.pending.lock().remove(&id) else {
            tracing::debug!("Editor response for unknown request id {}", id);
            return;
        };
        let outcome = if let Some(err) = msg.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown editor error")
                .to_owned();
            Err(message)
        } else {
            Ok(msg.get("result").cloned().unwrap_or(Value::Null))
        };
        let _ = tx.send(outcome);
    }

    fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = {
            let mut map = self.pending.lock();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(reason.to_owned()));
        }
    }
}

/// Resolve the editor socket path from an explicit flag or the environment.
pub fn socket_path_from_env(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    std::env::var_os("GEMINI_IDE_RPC_PATH")
        .map(PathBuf::from)
        .ok_or_else(|| BridgeError::Config {
            message: "editor RPC socket not set (pass --rpc-socket or set GEMINI_IDE_RPC_PATH)"
                .to_owned(),
        })
}
