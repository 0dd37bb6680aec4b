//! hostlink-server - standalone control plane driving a simulated host
//!
//! Useful for exercising clients without a real editor: builds, test runs,
//! artifact compilation and asset refreshes finish after canned delays.

use anyhow::{Context, Result};
use clap::Parser;
use hostlink_core::config::{ConfigOverrides, ConfigSource, ExecutorMode};
use hostlink_server::host::SimulatedHost;
use hostlink_server::{ControlPlane, InitOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::{error, info, warn};

/// hostlink control plane with a simulated host
#[derive(Parser, Debug)]
#[command(name = "hostlink-server")]
#[command(about = "Control plane for automating a long-running host application")]
#[command(version)]
struct Args {
    /// Workspace directory (used for config discovery and the instance key)
    #[arg(long, value_name = "PATH")]
    workspace: Option<PathBuf>,

    /// Extra configuration file layered above the workspace config
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// First port to try
    #[arg(long, value_name = "N")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Reload,
    Stop,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        hostlink_core::logging::init_with_level(tracing::Level::DEBUG);
    } else {
        hostlink_core::logging::init();
    }

    let home_dir =
        hostlink_core::home::get_home_dir().context("Failed to determine home directory")?;
    let workspace_dir = match args.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let source = ConfigSource {
        overrides: ConfigOverrides {
            port: args.port,
            config_path: args.config,
            // Nothing else would tick the simulated host.
            executor_mode: Some(ExecutorMode::Dedicated),
            ..ConfigOverrides::default()
        },
        workspace_dir,
        home_dir,
    };

    let mut plane = ControlPlane::new(source, Arc::new(SimulatedHost::default()))?;
    plane
        .initialize()
        .context("Failed to start the control plane")?;
    info!(
        port = plane.port().unwrap_or_default(),
        instance_key = plane.instance_key().unwrap_or_default(),
        "hostlink-server ready"
    );

    let signals = listen_for_signals().context("Failed to install signal handlers")?;
    for signal in signals {
        match signal {
            Signal::Reload => {
                info!(health = ?plane.health(), "Received SIGHUP; re-initializing");
                match plane.initialize() {
                    Ok(InitOutcome::AlreadyHealthy) => info!("control plane healthy"),
                    Ok(outcome) => info!(?outcome, port = plane.port(), "control plane re-initialized"),
                    Err(e) => {
                        error!("Re-initialization failed: {e:#}");
                        break;
                    }
                }
            }
            Signal::Stop => break,
        }
    }

    plane.shutdown();
    info!("hostlink-server shutdown complete");
    Ok(())
}

/// Forward process signals to the main thread.
///
/// The control plane owns its runtime and must be driven from a plain
/// thread, so signals are awaited on a small runtime of their own and handed
/// over through a channel.
fn listen_for_signals() -> Result<mpsc::Receiver<Signal>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (tx, rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("hostlink-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = forward_signals(&tx).await {
                    warn!("Signal handling failed: {e}");
                    let _ = tx.send(Signal::Stop);
                }
            })
        })?;
    Ok(rx)
}

#[cfg(unix)]
async fn forward_signals(tx: &mpsc::Sender<Signal>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        let next = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C)");
                Signal::Stop
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                Signal::Stop
            }
            _ = sighup.recv() => Signal::Reload,
        };
        if tx.send(next).is_err() || next == Signal::Stop {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(tx: &mpsc::Sender<Signal>) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = tx.send(Signal::Stop);
    Ok(())
}
