//! Editor channel event vocabulary
//!
//! The editor plugin emits a fixed set of named JSON-RPC notifications over
//! the Unix socket. Payloads are schemaless at the wire, so they are
//! validated here into tagged variants; unknown methods and malformed
//! params are dropped at this boundary instead of flowing into the core.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

/// Remote procedure names the plugin exposes to the bridge.
pub const PROC_OPEN_DIFF: &str = "open_diff";
pub const PROC_CLOSE_DIFF: &str = "close_diff";

/// A validated editor event.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    /// Editor focused a buffer.
    BufferEnter { path: PathBuf, bufnr: u64 },
    /// Cursor moved in the active buffer (1-based line and column).
    CursorMoved { line: u32, col: u32 },
    /// Visual selection updated.
    VisualChanged { selected_text: String },
    /// Buffer was deleted.
    BufferClosed { path: PathBuf },
    /// User accepted a pending diff.
    DiffAccepted { file_path: PathBuf, content: String },
    /// User rejected a pending diff.
    DiffRejected { file_path: PathBuf },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BufferEnterParams {
    path: PathBuf,
    #[serde(default)]
    bufnr: u64,
}

#[derive(Deserialize)]
struct CursorMovedParams {
    line: u32,
    col: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisualChangedParams {
    selected_text: String,
}

#[derive(Deserialize)]
struct BufferClosedParams {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiffAcceptedParams {
    file_path: PathBuf,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiffRejectedParams {
    file_path: PathBuf,
}

impl EditorEvent {
    /// Parse a notification into an event.
    ///
    /// Returns `None` for unknown methods, malformed params, and events
    /// whose path is empty or not absolute (ingress filtering). Cursor
    /// positions are 1-based; zero values are malformed.
    pub fn parse(method: &str, params: &Value) -> Option<Self> {
        match method {
            "buffer_enter" => {
                let p: BufferEnterParams = from_params(params)?;
                valid_path(&p.path)?;
                Some(Self::BufferEnter {
                    path: p.path,
                    bufnr: p.bufnr,
                })
            }
            "cursor_moved" => {
                let p: CursorMovedParams = from_params(params)?;
                if p.line == 0 || p.col == 0 {
                    return None;
                }
                Some(Self::CursorMoved {
                    line: p.line,
                    col: p.col,
                })
            }
            "visual_changed" => {
                let p: VisualChangedParams = from_params(params)?;
                Some(Self::VisualChanged {
                    selected_text: p.selected_text,
                })
            }
            "buffer_closed" => {
                let p: BufferClosedParams = from_params(params)?;
                valid_path(&p.path)?;
                Some(Self::BufferClosed { path: p.path })
            }
            "diff_accepted" => {
                let p: DiffAcceptedParams = from_params(params)?;
                valid_path(&p.file_path)?;
                Some(Self::DiffAccepted {
                    file_path: p.file_path,
                    content: p.content,
                })
            }
            "diff_rejected" => {
                let p: DiffRejectedParams = from_params(params)?;
                valid_path(&p.file_path)?;
                Some(Self::DiffRejected {
                    file_path: p.file_path,
                })
            }
            _ => None,
        }
    }
}

fn from_params<T: serde::de::DeserializeOwned>(params: &Value) -> Option<T> {
    serde_json::from_value(params.clone()).ok()
}

fn valid_path(path: &Path) -> Option<()> {
    if path.as_os_str().is_empty() || !path.is_absolute() {
        return None;
    }
    Some(())
}
