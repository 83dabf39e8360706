//! Device operations and their synchronous preconditions.

use std::fmt;

use crate::device::Device;
use crate::error::RequestError;

/// An operation a client can request on a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Bind the device's USB traffic to the remote session
    Attach,
    /// Unbind the device from the remote session
    Detach,
}

impl Action {
    /// Wire verb for this action.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
        }
    }

    /// Checks the preconditions that can be decided without the backend.
    ///
    /// Attach needs a redirectable, unattached device. Detach needs an
    /// attached device. A failure here means the backend is never called.
    pub fn check(self, device: &Device) -> Result<(), RequestError> {
        let index = device.index;
        match self {
            Self::Attach if !device.redirectable => Err(RequestError::NotRedirectable { index }),
            Self::Attach if device.attached => Err(RequestError::AlreadyAttached { index }),
            Self::Detach if !device.attached => Err(RequestError::NotAttached { index }),
            Self::Attach | Self::Detach => Ok(()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}
