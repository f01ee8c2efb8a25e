//! Context aggregator
//!
//! Maintains the open-file list with active file, cursor and visual
//! selection, and paces change notifications so cursor storms do not flood
//! connected clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │ editor      │────>│  aggregator  │────>│ debounce task    │
//! │ events      │     │  (mutations) │     │ (one signal per  │
//! └─────────────┘     └──────────────┘     │  quiet interval) │
//!                                          └──────────────────┘
//! ```
//!
//! Mutations mark the state dirty and wake the debounce task; the task
//! sleeps one interval and then emits a single change signal covering the
//! whole burst. Sustained traffic therefore yields at most one signal per
//! interval, and the signal always observes post-mutation state because
//! subscribers read a fresh snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::editor::EditorEvent;

/// Capacity of the open-file list; the oldest non-active entry is evicted
/// on overflow.
pub const MAX_OPEN_FILES: usize = 10;

/// Selected text is truncated to this many bytes on ingress.
pub const MAX_SELECTED_TEXT_BYTES: usize = 16_384;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Cursor position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub line: u32,
    pub character: u32,
}

/// One entry in the open-file list. Cursor and selection are only carried
/// by the active entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFile {
    pub path: PathBuf,
    pub timestamp: i64,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

/// Workspace-level state shared with clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    pub open_files: Vec<OpenFile>,
    pub is_trusted: bool,
}

/// The single externally observable snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeContext {
    pub workspace_state: WorkspaceState,
}

/// Aggregates editor events into an [`IdeContext`] and signals changes on a
/// broadcast channel after a debounce interval.
pub struct ContextAggregator {
    inner: Arc<Inner>,
    debounce_task: JoinHandle<()>,
}

struct Inner {
    files: Mutex<Vec<OpenFile>>,
    trusted: bool,
    dirty: Notify,
    changed_tx: broadcast::Sender<()>,
    debounce: Duration,
}

impl ContextAggregator {
    pub fn new(debounce: Duration, trusted: bool) -> Self {
        let (changed_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            files: Mutex::new(Vec::new()),
            trusted,
            dirty: Notify::new(),
            changed_tx,
            debounce,
        });

        let task_inner = Arc::clone(&inner);
        let debounce_task = tokio::spawn(async move {
            loop {
                task_inner.dirty.notified().await;
                tokio::time::sleep(task_inner.debounce).await;
                // Nobody listening yet is fine; subscribers read snapshots.
                let _ = task_inner.changed_tx.send(());
            }
        });

        Self {
            inner,
            debounce_task,
        }
    }

    /// Subscribe to change signals. Receivers carry no payload; they read
    /// [`ContextAggregator::snapshot`]. Dropping the receiver disposes the
    /// subscription and is safe at any point.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.changed_tx.subscribe()
    }

    /// Copy-on-read snapshot of the current context.
    pub fn snapshot(&self) -> IdeContext {
        IdeContext {
            workspace_state: WorkspaceState {
                open_files: self.inner.files.lock().clone(),
                is_trusted: self.inner.trusted,
            },
        }
    }

    /// Apply one editor event. Diff-outcome events are not context events
    /// and are ignored here; the diff coordinator owns them.
    pub fn ingest(&self, event: &EditorEvent) {
        match event {
            EditorEvent::BufferEnter { path, .. } => self.buffer_enter(path),
            EditorEvent::CursorMoved { line, col } => self.cursor_moved(*line, *col),
            EditorEvent::VisualChanged { selected_text } => self.visual_changed(selected_text),
            EditorEvent::BufferClosed { path } => self.buffer_closed(path),
            EditorEvent::DiffAccepted { .. } | EditorEvent::DiffRejected { .. } => return,
        }
        self.inner.dirty.notify_one();
    }

    /// Stop the debounce task. Called on bridge shutdown; further
    /// mutations no longer signal subscribers.
    pub fn shutdown(&self) {
        self.debounce_task.abort();
    }

    fn buffer_enter(&self, path: &Path) {
        let mut files = self.inner.files.lock();
        files.retain(|f| f.path != path);
        if let Some(active) = files.iter_mut().find(|f| f.is_active) {
            active.is_active = false;
            active.cursor = None;
            active.selected_text = None;
        }
        files.insert(
            0,
            OpenFile {
                path: path.to_path_buf(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                is_active: true,
                cursor: None,
                selected_text: None,
            },
        );
        // The active entry sits at the front, so truncation evicts the
        // oldest non-active entries.
        files.truncate(MAX_OPEN_FILES);
    }

    fn cursor_moved(&self, line: u32, col: u32) {
        let mut files = self.inner.files.lock();
        if let Some(active) = files.iter_mut().find(|f| f.is_active) {
            active.cursor = Some(Cursor {
                line,
                character: col,
            });
        }
    }

    fn visual_changed(&self, selected_text: &str) {
        let mut files = self.inner.files.lock();
        if let Some(active) = files.iter_mut().find(|f| f.is_active) {
            active.selected_text = if selected_text.is_empty() {
                None
            } else {
                Some(truncate_to_char_boundary(selected_text, MAX_SELECTED_TEXT_BYTES).to_owned())
            };
        }
    }

    fn buffer_closed(&self, path: &Path) {
        self.inner.files.lock().retain(|f| f.path != path);
    }
}

impl Drop for ContextAggregator {
    fn drop(&mut self) {
        self.debounce_task.abort();
    }
}

/// Truncate to the last valid char boundary at or before `max_bytes`.
/// The result must stay valid UTF-8 for the wire, so a cap landing inside
/// a multi-byte character backs off to the boundary (at most 3 bytes).
fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
