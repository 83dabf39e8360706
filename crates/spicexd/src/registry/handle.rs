//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A stopped actor surfaces as `RequestError::RegistryUnavailable`

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use spicex_core::{Action, DeviceIndex, DeviceSnapshot, RequestError};

use super::commands::{RegistryCommand, StartedOperation};

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Capture a fresh device snapshot.
    ///
    /// # Errors
    ///
    /// - `RequestError::RegistryUnavailable` if the backend cannot enumerate
    ///   or the actor has shut down
    pub async fn snapshot(&self) -> Result<DeviceSnapshot, RequestError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|_| actor_gone())?;

        rx.await.map_err(|_| actor_gone())?
    }

    /// Validate an attach/detach and start it on the backend.
    ///
    /// # Errors
    ///
    /// Any synchronous precondition failure; see `RegistryCommand::Begin`.
    pub async fn begin(
        &self,
        action: Action,
        index: DeviceIndex,
    ) -> Result<StartedOperation, RequestError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Begin {
                action,
                index,
                respond_to: tx,
            })
            .await
            .map_err(|_| actor_gone())?;

        rx.await.map_err(|_| actor_gone())?
    }
}

fn actor_gone() -> RequestError {
    warn!("Registry actor is not running");
    RequestError::RegistryUnavailable
}
