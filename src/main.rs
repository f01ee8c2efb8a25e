//! IDE bridge entry point

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gemini_ide_bridge::{Cli, IdeBridge};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug_enabled());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> gemini_ide_bridge::Result<()> {
    let config = cli.into_config()?;
    let bridge = IdeBridge::start(config).await?;

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Termination signal received");
        }
        _ = bridge.editor_closed() => {
            tracing::info!("Editor went away, shutting down");
        }
    }

    bridge.stop().await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug {
        "gemini_ide_bridge=debug"
    } else {
        "gemini_ide_bridge=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
