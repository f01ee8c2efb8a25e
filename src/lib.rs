//! IDE companion bridge
//!
//! A local, per-editor side-car that mediates between a running editor
//! session and an AI coding assistant. The bridge attaches to the editor's
//! RPC socket, aggregates live context (open files, cursor, visual
//! selection), and serves it to clients over a loopback HTTP/JSON-RPC
//! session protocol, including inline diff review driven from the client
//! side.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐  unix socket   ┌───────────────┐  debounced   ┌─────────────┐
//! │ editor │───────────────>│ editor adapter │─────────────>│ aggregator  │
//! │ plugin │<───────────────│  (JSON-RPC)    │              └──────┬──────┘
//! └────────┘  open/close    └──────┬────────┘                      │
//!             diff                 │ diff outcomes                 │
//!                                  v                               v
//!                           ┌────────────┐   notifications  ┌───────────┐
//!                           │ diff coord │─────────────────>│ session   │
//!                           └────────────┘                  │ hub       │
//!                                                           └─────┬─────┘
//!                            loopback HTTP (POST/GET /mcp)        │
//!                           <─────────────────────────────────────┘
//! ```
//!
//! Discovery files under `<tmp>/gemini/ide/` let clients find the port and
//! auth token of a running bridge.

pub mod cli;
pub mod context;
pub mod diff;
pub mod discovery;
pub mod editor;
pub mod error;
pub mod http;
pub mod hub;
pub mod mcp;
pub mod rpc;
pub mod server;

// Re-export commonly used types
pub use cli::Cli;
pub use context::{ContextAggregator, Cursor, IdeContext, OpenFile, WorkspaceState};
pub use diff::DiffCoordinator;
pub use discovery::{DiscoveryPublisher, IdeInfo, PortDescriptor};
pub use editor::{EditorConnection, EditorEvent};
pub use error::{BridgeError, Result};
pub use http::MCP_SESSION_HEADER;
pub use hub::SessionHub;
pub use mcp::McpServer;
pub use server::{BridgeConfig, IdeBridge};
