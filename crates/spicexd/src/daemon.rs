//! Daemon wiring.
//!
//! Starts the registry and the session manager on an established session,
//! binds the control socket and serves until shutdown.

use std::future::Future;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use spicex_core::Endpoint;

use crate::backend::SessionLink;
use crate::context::DaemonContext;
use crate::registry::spawn_registry;
use crate::server::{DaemonServer, ServerError};
use crate::session::{SessionError, SessionManager};

/// Waits for the session connect unless shutdown is requested first.
///
/// Returns `Ok(None)` when `shutdown` is cancelled before the connect
/// finishes. The pending connect is dropped.
///
/// # Errors
///
/// Whatever error the connect itself returns.
pub async fn connect_session<F>(
    connect: F,
    shutdown: &CancellationToken,
) -> Result<Option<SessionLink>, SessionError>
where
    F: Future<Output = Result<SessionLink, SessionError>>,
{
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            info!("Shutdown requested while connecting to the remote session");
            Ok(None)
        }

        link = connect => link.map(Some),
    }
}

/// Serves the control socket for a connected session.
///
/// Returns once `shutdown` is cancelled, either by the caller or by the
/// session manager when the main channel closes. The session is always
/// disconnected before this returns.
///
/// # Errors
///
/// `ServerError::Bind` if the control socket cannot be bound. The session
/// is disconnected first.
pub async fn serve(
    socket_path: &Path,
    endpoint: Endpoint,
    link: SessionLink,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let SessionLink {
        control,
        events,
        devices,
    } = link;

    let registry = spawn_registry(devices);
    info!("Device registry started");

    let manager = SessionManager::new(endpoint, control, events, shutdown.clone());
    let manager_task = tokio::spawn(manager.run());

    let context = DaemonContext::new(registry, shutdown.clone());
    let server = match DaemonServer::bind(socket_path, context) {
        Ok(server) => server,
        Err(e) => {
            shutdown.cancel();
            if let Err(join_error) = manager_task.await {
                error!(error = %join_error, "Session manager task failed");
            }
            return Err(e);
        }
    };

    server.run().await;

    match manager_task.await {
        Ok(session) => info!(state = %session.state(), "Session manager stopped"),
        Err(e) => error!(error = %e, "Session manager task failed"),
    }

    Ok(())
}
