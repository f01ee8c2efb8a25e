//! Diff coordinator
//!
//! Drives the editor's diff view through the two remote procedures and
//! translates editor-emitted diff outcomes into protocol notifications for
//! the session hub. Subscribers receive ready-to-send JSON-RPC
//! notification values; ordering follows the arrival order of the
//! originating editor events.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::editor::{EditorConnection, EditorEvent};
use crate::error::Result;
use crate::rpc;

/// Notification method for an accepted diff.
pub const METHOD_DIFF_ACCEPTED: &str = "ide/diffAccepted";
/// Notification method for a rejected diff.
pub const METHOD_DIFF_REJECTED: &str = "ide/diffRejected";

const NOTIFY_CHANNEL_CAPACITY: usize = 64;

pub struct DiffCoordinator {
    editor: EditorConnection,
    notify_tx: broadcast::Sender<Value>,
    outcome_task: JoinHandle<()>,
}

impl DiffCoordinator {
    /// Create the coordinator and install its one-time subscription to the
    /// editor's diff-outcome events.
    pub fn new(editor: EditorConnection) -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);

        let mut events = editor.subscribe();
        let tx = notify_tx.clone();
        let outcome_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EditorEvent::DiffAccepted { file_path, content }) => {
                        let _ = tx.send(rpc::notification(
                            METHOD_DIFF_ACCEPTED,
                            json!({ "filePath": file_path, "content": content }),
                        ));
                    }
                    Ok(EditorEvent::DiffRejected { file_path }) => {
                        let _ = tx.send(rpc::notification(
                            METHOD_DIFF_REJECTED,
                            json!({ "filePath": file_path }),
                        ));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Diff outcome subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Arc::new(Self {
            editor,
            notify_tx,
            outcome_task,
        })
    }

    /// Subscribe to translated diff notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notify_tx.subscribe()
    }

    /// Open a diff view in the editor. Resolves once the editor has opened
    /// it; failure is surfaced to the caller.
    pub async fn open_diff(&self, file_path: &Path, new_content: &str) -> Result<()> {
        self.editor.open_diff(file_path, new_content).await
    }

    /// Close the diff view, returning its current edited content, or `None`
    /// when no diff was open for `file_path`.
    pub async fn close_diff(&self, file_path: &Path) -> Result<Option<String>> {
        self.editor.close_diff(file_path).await
    }
}

impl Drop for DiffCoordinator {
    fn drop(&mut self) {
        self.outcome_task.abort();
    }
}
