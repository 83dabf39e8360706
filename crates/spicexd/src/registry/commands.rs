//! Registry actor commands.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `StartedOperation`: An attach/detach the backend accepted
//!
//! Request errors are `spicex_core::RequestError`; their display text is
//! what the client receives.

use spicex_core::{Action, Device, DeviceIndex, DeviceSnapshot, RequestError};
use tokio::sync::oneshot;

use crate::backend::Completion;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Capture a fresh device snapshot.
    ///
    /// # Errors
    /// - `RequestError::RegistryUnavailable` if the backend cannot enumerate
    Snapshot {
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<DeviceSnapshot, RequestError>>,
    },

    /// Validate an attach/detach against a fresh snapshot and, if it passes,
    /// issue the backend call.
    ///
    /// Validation and the backend call happen in the same actor step, so no
    /// other command can change the device between the two.
    ///
    /// # Errors
    /// - `RequestError::RegistryUnavailable`
    /// - `RequestError::IndexOutOfRange`
    /// - `RequestError::NotRedirectable` / `AlreadyAttached` (attach)
    /// - `RequestError::NotAttached` (detach)
    Begin {
        action: Action,
        index: DeviceIndex,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<StartedOperation, RequestError>>,
    },
}

/// An attach/detach the backend has accepted but not yet finished.
#[derive(Debug)]
pub struct StartedOperation {
    pub action: Action,

    /// Target device as resolved from the snapshot
    pub device: Device,

    /// Resolves when the backend finishes
    pub completion: Completion,
}
