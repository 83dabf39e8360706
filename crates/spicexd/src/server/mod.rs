//! Unix socket server for the spicex daemon.
//!
//! The server:
//! - Binds the control socket, replacing a stale socket file
//! - Spawns a ConnectionHandler for each client
//! - Supports shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └───────┬─────────┘     └─────────────────┘
//!         │ attach / detach
//!         ▼
//! ┌─────────────────┐
//! │OperationTracker │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};
pub(crate) use connection::send_response;

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::context::DaemonContext;

/// Unix socket server for the spicex daemon.
pub struct DaemonServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Bound listener
    listener: UnixListener,

    /// Shared state for connection handlers
    context: DaemonContext,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,
}

impl DaemonServer {
    /// Binds the control socket.
    ///
    /// Creates the parent directory if needed. An existing socket file with
    /// no listener behind it is removed first.
    ///
    /// # Errors
    ///
    /// `ServerError::Bind` if another process is listening on the path, the
    /// path is not a socket, or binding fails.
    pub fn bind(
        socket_path: impl Into<PathBuf>,
        context: DaemonContext,
    ) -> Result<Self, ServerError> {
        let socket_path = socket_path.into();
        let bind_error = |reason: String| ServerError::Bind {
            path: socket_path.clone(),
            reason,
        };

        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| bind_error(e.to_string()))?;
            }
        }

        remove_stale_socket(&socket_path).map_err(bind_error)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| bind_error(e.to_string()))?;

        Ok(Self {
            socket_path,
            listener,
            context,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Accepts connections until the shutdown token is cancelled, then
    /// removes the socket file.
    pub async fn run(self) {
        info!(
            socket = %self.socket_path.display(),
            "Daemon server listening"
        );

        let shutdown = self.context.shutdown.clone();

        // Accept connections until cancelled
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        self.cleanup();
    }

    /// Handles a new client connection by spawning a handler task.
    ///
    /// The task is abandoned when the daemon shuts down; dropping it closes
    /// the stream without a response.
    fn handle_connection(&self, stream: UnixStream, connection_number: u64) {
        let context = self.context.clone();

        tokio::spawn(async move {
            let shutdown = context.shutdown.clone();
            let handler = ConnectionHandler::new(stream, context, connection_number);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(connection = connection_number, "Connection abandoned on shutdown");
                }
                _ = handler.run() => {}
            }
        });
    }

    /// Performs cleanup on shutdown.
    fn cleanup(&self) {
        let in_flight = self.context.tracker.in_flight_operations();
        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Abandoning in-flight device operations");
        }
        for op in &in_flight {
            debug!(
                connection = op.connection,
                action = %op.action,
                device = %op.device,
                started_at = %op.started_at,
                "Abandoned device operation"
            );
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Removes a socket file that no daemon is listening on.
fn remove_stale_socket(path: &Path) -> Result<(), String> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.to_string()),
    };

    if !metadata.file_type().is_socket() {
        return Err("path exists and is not a socket".to_string());
    }

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Err("another daemon is listening on this socket".to_string()),
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            std::fs::remove_file(path).map_err(|e| e.to_string())?;
            info!(socket = %path.display(), "Removed stale socket file");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind control socket at {}: {reason}", path.display())]
    Bind { path: PathBuf, reason: String },
}
