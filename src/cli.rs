//! CLI argument definitions using clap
//!
//! The bridge is normally spawned by the editor plugin with everything in
//! the environment; every flag exists so the same binary can be driven by
//! hand when debugging a plugin.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{BridgeError, Result};
use crate::server::{default_discovery_dir, BridgeConfig};

/// Debounce bounds; values outside are clamped.
const MIN_DEBOUNCE_MS: u64 = 50;
const MAX_DEBOUNCE_MS: u64 = 1000;

/// IDE companion bridge between an editor session and AI coding assistants
#[derive(Parser, Debug)]
#[command(name = "gemini-ide-bridge")]
#[command(about = "Per-editor side-car exposing live editor context over loopback MCP")]
#[command(version)]
pub struct Cli {
    /// Editor RPC socket path (defaults to $GEMINI_IDE_RPC_PATH)
    #[arg(long, value_name = "PATH")]
    pub rpc_socket: Option<PathBuf>,

    /// Workspace root advertised to clients
    /// (defaults to $GEMINI_IDE_WORKSPACE, then the current directory)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Editor identifier used in discovery file names
    #[arg(long, default_value = "neovim")]
    pub editor: String,

    /// Context change coalescing interval in milliseconds
    #[arg(long, default_value_t = 200, value_name = "MS")]
    pub debounce_ms: u64,

    /// Keep-alive ping interval per client session, in seconds
    #[arg(long, default_value_t = 60, value_name = "SECS")]
    pub keep_alive_secs: u64,

    /// Advertise the workspace as untrusted
    #[arg(long)]
    pub untrusted: bool,

    /// Show debug output (also enabled by $GEMINI_IDE_DEBUG)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Whether debug logging was requested via flag or environment.
    pub fn debug_enabled(&self) -> bool {
        self.verbose || std::env::var_os("GEMINI_IDE_DEBUG").is_some()
    }

    /// Resolve flags and environment into a bridge configuration.
    pub fn into_config(self) -> Result<BridgeConfig> {
        let rpc_socket = crate::editor::socket_path_from_env(self.rpc_socket)?;

        let workspace = match self
            .workspace
            .or_else(|| std::env::var_os("GEMINI_IDE_WORKSPACE").map(PathBuf::from))
        {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| BridgeError::Config {
                message: format!("cannot determine workspace directory: {}", e),
            })?,
        };

        let debounce_ms = self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);

        Ok(BridgeConfig {
            rpc_socket,
            workspace,
            editor: self.editor,
            debounce: Duration::from_millis(debounce_ms),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(1)),
            trusted: !self.untrusted,
            discovery_dir: default_discovery_dir(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cli = Cli::parse_from(["gemini-ide-bridge"]);
        assert_eq!(cli.editor, "neovim");
        assert_eq!(cli.debounce_ms, 200);
        assert_eq!(cli.keep_alive_secs, 60);
        assert!(!cli.untrusted);
    }

    #[test]
    fn debounce_is_clamped() {
        let cli = Cli::parse_from([
            "gemini-ide-bridge",
            "--rpc-socket",
            "/tmp/e.sock",
            "--debounce-ms",
            "5",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.debounce, Duration::from_millis(MIN_DEBOUNCE_MS));
    }

    #[test]
    fn explicit_flags_override_environment() {
        let cli = Cli::parse_from([
            "gemini-ide-bridge",
            "--rpc-socket",
            "/tmp/e.sock",
            "--workspace",
            "/ws",
            "--untrusted",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.rpc_socket, PathBuf::from("/tmp/e.sock"));
        assert_eq!(config.workspace, PathBuf::from("/ws"));
        assert!(!config.trusted);
    }
}
