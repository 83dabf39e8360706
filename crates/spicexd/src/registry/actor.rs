//! Registry actor - owns the device backend and processes commands.
//!
//! The RegistryActor is the single owner of the `DeviceBackend`. Every
//! backend call in the daemon happens on this task, one command at a time.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the requester went away)

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use spicex_core::{Action, DeviceId, DeviceIndex, DeviceInfo, DeviceSnapshot, RequestError};

use super::commands::{RegistryCommand, StartedOperation};
use crate::backend::DeviceBackend;

/// The registry actor - owns the device backend.
///
/// Receives commands via mpsc channel and processes them sequentially.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// The session's USB device manager
    backend: Box<dyn DeviceBackend>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, backend: Box<dyn DeviceBackend>) -> Self {
        Self { receiver, backend }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Snapshot { respond_to } => {
                let result = self.handle_snapshot();
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Begin {
                action,
                index,
                respond_to,
            } => {
                let result = self.handle_begin(action, index);
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Enumerates and describes all devices.
    fn handle_snapshot(&mut self) -> Result<DeviceSnapshot, RequestError> {
        let ids = self.backend.devices().map_err(|e| {
            warn!(error = %e, "Unable to retrieve devices");
            RequestError::RegistryUnavailable
        })?;

        let infos: Vec<DeviceInfo> = ids
            .into_iter()
            .enumerate()
            .map(|(position, id)| self.describe(position + 1, id))
            .collect();

        debug!(devices = infos.len(), "Captured device snapshot");
        Ok(DeviceSnapshot::capture(infos))
    }

    /// Describes one device.
    ///
    /// A failing redirect check is logged and the device reported as not
    /// redirectable; it does not abort the snapshot.
    fn describe(&self, index: usize, id: DeviceId) -> DeviceInfo {
        let redirectable = match self.backend.can_redirect(id) {
            Ok(redirectable) => redirectable,
            Err(e) => {
                warn!(
                    index,
                    device = %id,
                    error = %e,
                    "Error when checking redirection status of device"
                );
                false
            }
        };

        DeviceInfo {
            id,
            description: self.backend.description(id),
            redirectable,
            attached: self.backend.is_attached(id),
        }
    }

    /// Validates an operation and issues exactly one backend call if it passes.
    fn handle_begin(
        &mut self,
        action: Action,
        index: DeviceIndex,
    ) -> Result<StartedOperation, RequestError> {
        let snapshot = self.handle_snapshot()?;
        let device = snapshot.resolve(index.get())?.clone();
        action.check(&device)?;

        let completion = match action {
            Action::Attach => self.backend.begin_attach(device.id),
            Action::Detach => self.backend.begin_detach(device.id),
        };

        info!(
            index = %device.index,
            device = %device.description,
            action = %action,
            "Device operation started"
        );

        Ok(StartedOperation {
            action,
            device,
            completion,
        })
    }
}
