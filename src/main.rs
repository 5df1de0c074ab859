//! # vigil
//!
//! Command line front end: keeps a live mirror of a camera server's registry
//! and recordings, or prints a one-off snapshot of it.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::{ConnectionId, LifecycleSignal};
use vigil_mirror::{by_identifier, Connection, MirrorConfig, MirrorState, Orchestrator, Registry};
use vigil_settings::VigilSettings;
use vigil_ws::{WsConfig, WsConnection, WsFactory};

/// Live mirror of a camera server's registry.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Live mirror of a camera server's registry")]
struct Cli {
    /// Settings file (defaults to `~/.vigil/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log JSON lines instead of compact text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the mirror and log every state change until Ctrl-C.
    Watch {
        /// Server WebSocket URL.
        #[arg(long)]
        url: Option<String>,
    },
    /// Fetch the cameras once and print the registry as JSON.
    Snapshot {
        /// Server WebSocket URL.
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the effective settings as JSON.
    Config,
}

fn load(cli: &Cli, url: Option<&String>) -> Result<VigilSettings> {
    let mut settings = match &cli.settings {
        Some(path) => vigil_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => vigil_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(url) = url {
        settings.server.url.clone_from(url);
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn mirror_config(settings: &VigilSettings) -> MirrorConfig {
    MirrorConfig {
        buffer_during_snapshot: settings.mirror.buffer_during_snapshot,
        reregistration: settings.mirror.reregistration,
        ..MirrorConfig::default()
    }
}

fn log_summary(state: &MirrorState) {
    info!(
        revision = state.revision,
        connected = state.connected,
        cameras = state.registry.len(),
        recordings = state.registry.recording_count(),
        "mirror updated"
    );
}

async fn watch(settings: &VigilSettings) -> Result<()> {
    let factory = Arc::new(WsFactory::new(WsConfig::from_settings(
        &settings.server,
        &settings.reconnect,
    )));
    let mut orchestrator = Orchestrator::new(factory, mirror_config(settings));
    let connection = orchestrator.initialize();
    let mut view = orchestrator.view();
    let mut diagnostics = orchestrator.diagnostics();
    info!(url = %settings.server.url, connection_id = %connection, "starting mirror");

    let shutdown = CancellationToken::new();
    let task = orchestrator.spawn(shutdown.clone());
    let ctrl_c = shutdown.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        ctrl_c.cancel();
    });

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            state = view.changed() => match state {
                Some(state) => log_summary(&state),
                None => break,
            },
            err = diagnostics.recv() => match err {
                Ok(err) => warn!(error = %err, error_kind = err.error_kind(), "sync error"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "diagnostics lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    shutdown.cancel();
    task.await.context("Mirror task failed")?;
    Ok(())
}

async fn snapshot(settings: &VigilSettings) -> Result<()> {
    let config = WsConfig::from_settings(&settings.server, &settings.reconnect);
    let wait = config.connect_timeout + config.command_timeout;
    let conn = WsConnection::new(ConnectionId::new(), Arc::new(config));
    let mut signals = conn.lifecycle();

    conn.connect()
        .await
        .with_context(|| format!("Failed to connect to {}", settings.server.url))?;
    match tokio::time::timeout(wait, signals.recv()).await {
        Ok(Ok(LifecycleSignal::Connected)) => {}
        Ok(other) => bail!("Connection did not come up: {other:?}"),
        Err(_) => bail!("Timed out waiting for the session after {wait:?}"),
    }

    let cameras = conn.fetch_cameras().await.context("Failed to fetch cameras")?;
    conn.close();

    let registry = Registry::from_cameras(cameras, by_identifier);
    println!("{}", serde_json::to_string_pretty(&registry)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let url = match &cli.command {
        Command::Watch { url } | Command::Snapshot { url } => url.as_ref(),
        Command::Config => None,
    };
    let settings = load(&cli, url)?;

    if let Command::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    vigil_logging::init_logging(&settings.logging).context("Failed to initialize logging")?;

    match cli.command {
        Command::Watch { .. } => watch(&settings).await,
        Command::Snapshot { .. } => snapshot(&settings).await,
        Command::Config => Ok(()),
    }
}
