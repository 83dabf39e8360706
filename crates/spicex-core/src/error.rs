//! Request and operation error types following panic-free policy.

use thiserror::Error;

use crate::action::Action;
use crate::device::DeviceIndex;

/// Per-request errors reported to the client.
///
/// The `Display` output is exactly the diagnostic written on the wire
/// before the connection is closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request did not parse as `list`, `attach:<n>` or `detach:<n>`
    #[error("Invalid message format")]
    InvalidFormat,

    /// The backend could not enumerate devices
    #[error("Unable to retrieve devices")]
    RegistryUnavailable,

    /// The index does not exist in the current snapshot
    #[error("Device index not found")]
    IndexOutOfRange { index: u32, len: usize },

    /// Attach requested for a device the backend refuses to redirect
    #[error("Cannot redirect device #{index}")]
    NotRedirectable { index: DeviceIndex },

    /// Attach requested for a device that is already attached
    #[error("Device #{index}, already attached")]
    AlreadyAttached { index: DeviceIndex },

    /// Detach requested for a device that is not attached
    #[error("Device #{index} not attached")]
    NotAttached { index: DeviceIndex },
}

/// An attach/detach that the backend accepted but failed to complete.
///
/// Only logged. The client receives the coarse `failure` token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Could not redirect {description}: {reason}")]
    Attach { description: String, reason: String },

    #[error("Could not detach {description}: {reason}")]
    Detach { description: String, reason: String },
}

impl OperationError {
    /// Builds the error for the given action.
    pub fn new(action: Action, description: impl Into<String>, reason: impl Into<String>) -> Self {
        let description = description.into();
        let reason = reason.into();
        match action {
            Action::Attach => Self::Attach {
                description,
                reason,
            },
            Action::Detach => Self::Detach {
                description,
                reason,
            },
        }
    }

    /// Returns the action that failed.
    pub fn action(&self) -> Action {
        match self {
            Self::Attach { .. } => Action::Attach,
            Self::Detach { .. } => Action::Detach,
        }
    }
}
