//! spicex Daemon - USB redirection control server
//!
//! Connects to a remote display session and serves a control socket through
//! which local clients list USB devices and attach/detach them.
//!
//! # Usage
//!
//! ```bash
//! # Serve the session on port 5900
//! spicexd 5900
//!
//! # Custom host and socket path
//! spicexd --host 10.0.0.5 --socket /run/spicex.sock 5900
//!
//! # Simulated devices from a fixture file
//! spicexd --fixture devices.toml 5900
//!
//! # Talk to it
//! printf list | socat - UNIX-CONNECT:$XDG_RUNTIME_DIR/spicex-5900.sock
//!
//! # Enable debug logging
//! RUST_LOG=spicexd=debug spicexd 5900
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: shutdown; in-flight requests are abandoned

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spicexd::backend::simulated::{Fixture, SimulatedBackend, SimulatedSession};
use spicexd::config::{DaemonConfig, DEFAULT_HOST};
use spicexd::daemon::{connect_session, serve};

/// spicex daemon - USB redirection control for a remote display session
#[derive(Parser, Debug)]
#[command(name = "spicexd", version, about)]
struct Args {
    /// Port of the remote display endpoint
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Host of the remote display endpoint
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Control socket path (defaults to $SPICEX_SOCKET, then
    /// <runtime-dir>/spicex-<port>.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// TOML device fixture for the simulated backend
    #[arg(long)]
    fixture: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::resolve(args.host, args.port, args.socket, args.fixture);
    run_daemon(config)
}

/// Runs the daemon (async entry point).
#[tokio::main(flavor = "current_thread")]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spicexd=info".parse()?)
                .add_directive("spicex_core=info".parse()?)
                .add_directive("spicex_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        uri = %config.endpoint.uri(),
        "spicex daemon starting"
    );

    let fixture = match &config.fixture {
        Some(path) => Fixture::load(path).context("Failed to load device fixture")?,
        None => {
            info!("No device fixture given, serving an empty device list");
            Fixture::default()
        }
    };

    // Create cancellation token for shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let connect = SimulatedSession::connect(&config.endpoint, SimulatedBackend::new(fixture));
    let Some(link) = connect_session(connect, &cancel_token)
        .await
        .context("Failed to connect to the remote session")?
    else {
        info!("spicex daemon stopped before the session was established");
        return Ok(());
    };

    serve(&config.socket_path, config.endpoint, link, cancel_token)
        .await
        .context("Server error")?;

    info!("spicex daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
