//! Error types and exit codes for the IDE bridge

use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to attach to editor at {path}: {source}")]
    EditorAttach {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Editor RPC error: {message}")]
    EditorRpc { message: String },

    #[error("Editor connection closed")]
    EditorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Convert error to the process exit code:
    /// - 0: graceful shutdown (never reaches here)
    /// - 1: unrecoverable startup failure (missing config, editor attach)
    ///
    /// Transient runtime errors (transport sends, side-file I/O) are logged
    /// where they occur and never terminate the process, so every error that
    /// bubbles up to `main` is a startup failure.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(1)
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
