//! Bridge assembly
//!
//! [`IdeBridge`] wires the components together and owns every piece of
//! process-lifetime state: the auth token, the session hub, the context
//! aggregator, the diff coordinator, the discovery files and the HTTP
//! listener. Handlers and tests reach state through accessors; nothing is
//! read from process-wide globals.
//!
//! Data flow (editor → client): editor adapter → aggregator → hub → HTTP.
//! Control flow (client → editor): HTTP → MCP dispatch → diff coordinator
//! → editor adapter.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::context::ContextAggregator;
use crate::diff::DiffCoordinator;
use crate::discovery::{self, DiscoveryPublisher};
use crate::editor::EditorConnection;
use crate::error::Result;
use crate::http::{build_router, BridgeState};
use crate::hub::SessionHub;
use crate::mcp::{self, McpServer};

/// Runtime configuration, resolved from CLI flags and the environment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path to the editor's RPC socket.
    pub rpc_socket: PathBuf,
    /// Workspace root advertised to clients.
    pub workspace: PathBuf,
    /// Editor identifier used in discovery files.
    pub editor: String,
    /// Context change coalescing interval.
    pub debounce: Duration,
    /// Keep-alive ping interval per session.
    pub keep_alive: Duration,
    /// Whether the workspace is advertised as trusted.
    pub trusted: bool,
    /// Directory for descriptor and env files.
    pub discovery_dir: PathBuf,
}

pub struct IdeBridge {
    state: Arc<BridgeState>,
    hub: Arc<SessionHub>,
    aggregator: Arc<ContextAggregator>,
    editor: EditorConnection,
    discovery: DiscoveryPublisher,
    auth_token: Uuid,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    wiring_tasks: Vec<JoinHandle<()>>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl IdeBridge {
    /// Attach to the editor, bind the loopback listener, publish discovery
    /// files and start serving. Errors here are unrecoverable startup
    /// failures.
    pub async fn start(config: BridgeConfig) -> Result<Self> {
        let editor = EditorConnection::connect(&config.rpc_socket).await?;
        let aggregator = Arc::new(ContextAggregator::new(config.debounce, config.trusted));
        let diff = DiffCoordinator::new(editor.clone());
        let hub = SessionHub::new(config.keep_alive);
        let auth_token = Uuid::new_v4();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;

        let mut discovery = DiscoveryPublisher::new(config.discovery_dir, config.editor.clone());
        discovery.publish(local_addr.port(), &config.workspace, &auth_token)?;

        let state = Arc::new(BridgeState::new(
            Arc::clone(&hub),
            Arc::clone(&aggregator),
            McpServer::new(Arc::clone(&diff)),
            auth_token.to_string(),
            local_addr.port(),
        ));

        let wiring_tasks = vec![
            spawn_editor_ingress(&editor, &aggregator),
            spawn_context_fanout(&aggregator, &hub),
            spawn_diff_fanout(&diff, &hub),
        ];

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let router = build_router(Arc::clone(&state));
        let serve_task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("HTTP listener error: {}", e);
            }
        });

        tracing::info!(
            "IDE bridge for {} listening on {} (workspace {})",
            config.editor,
            local_addr,
            config.workspace.display()
        );

        Ok(Self {
            state,
            hub,
            aggregator,
            editor,
            discovery,
            auth_token,
            local_addr,
            shutdown_tx,
            wiring_tasks,
            serve_task: Mutex::new(Some(serve_task)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Stop the listener, close every session, and unlink the discovery
    /// files. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down IDE bridge");

        let _ = self.shutdown_tx.send(true);
        let serve_task = self.serve_task.lock().take();
        if let Some(task) = serve_task {
            let _ = task.await;
        }

        self.hub.close_all();
        self.aggregator.shutdown();
        for task in &self.wiring_tasks {
            task.abort();
        }
        self.discovery.cleanup();
    }

    /// Resolves when the editor closes its side of the RPC socket.
    pub async fn editor_closed(&self) {
        self.editor.closed().await
    }

    /// A router over this bridge's state, for in-process tests.
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Read-only token accessor for tests; the token itself is never
    /// logged.
    pub fn auth_token(&self) -> &Uuid {
        &self.auth_token
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn context(&self) -> &Arc<ContextAggregator> {
        &self.aggregator
    }
}

fn spawn_editor_ingress(
    editor: &EditorConnection,
    aggregator: &Arc<ContextAggregator>,
) -> JoinHandle<()> {
    let mut events = editor.subscribe();
    let aggregator = Arc::clone(aggregator);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => aggregator.ingest(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Context ingress lagged by {} editor events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_context_fanout(
    aggregator: &Arc<ContextAggregator>,
    hub: &Arc<SessionHub>,
) -> JoinHandle<()> {
    let mut changed = aggregator.subscribe();
    let aggregator = Arc::clone(aggregator);
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        loop {
            match changed.recv().await {
                Ok(()) => {
                    hub.broadcast(mcp::context_notification(&aggregator.snapshot()));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Coalesced signals carry no payload; the next snapshot
                    // covers whatever was missed.
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_diff_fanout(diff: &Arc<DiffCoordinator>, hub: &Arc<SessionHub>) -> JoinHandle<()> {
    let mut notifications = diff.subscribe();
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => hub.broadcast(notification),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Diff fan-out lagged by {} notifications", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Default discovery directory, re-exported for `main`.
pub fn default_discovery_dir() -> PathBuf {
    discovery::default_dir()
}
