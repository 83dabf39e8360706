//! Collaborator interfaces for the remote session library.
//!
//! The daemon never talks to the remote display protocol directly. It sees:
//! - [`SessionControl`] - channel connect and session disconnect
//! - a stream of [`SessionEvent`]s for channel lifecycle
//! - [`DeviceBackend`] - the session's USB device manager
//!
//! Attach and detach are two-phase: `begin_*` returns immediately with a
//! [`Completion`] that resolves when the backend finishes.
//!
//! # Panic-Free Guarantees
//!
//! Implementations must not panic. A dropped [`Completer`] resolves its
//! [`Completion`] as an error instead of hanging or panicking.

pub mod simulated;

use spicex_core::{ChannelId, DeviceId, SessionEvent};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Error reported by the remote session library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// The session's USB device manager.
///
/// Owned by the registry actor; all calls happen on that single task.
pub trait DeviceBackend: Send + 'static {
    /// Enumerates all known devices in backend order.
    fn devices(&mut self) -> Result<Vec<DeviceId>, BackendError>;

    /// Human-readable description of a device.
    fn description(&self, device: DeviceId) -> String;

    /// Whether the device may be redirected. Can fail independently of the answer.
    fn can_redirect(&self, device: DeviceId) -> Result<bool, BackendError>;

    /// Whether the device is currently attached to the remote session.
    fn is_attached(&self, device: DeviceId) -> bool;

    /// Starts redirecting the device to the remote session.
    fn begin_attach(&mut self, device: DeviceId) -> Completion;

    /// Starts releasing the device from the remote session.
    fn begin_detach(&mut self, device: DeviceId) -> Completion;
}

/// Control handle for the remote session.
pub trait SessionControl: Send + 'static {
    /// Initiates the connection of an announced channel.
    fn connect_channel(&mut self, channel: ChannelId) -> Result<(), BackendError>;

    /// Tears down the session.
    fn disconnect(&mut self);
}

/// Everything a successful session connect hands to the daemon.
pub struct SessionLink {
    pub control: Box<dyn SessionControl>,
    pub events: mpsc::Receiver<SessionEvent>,
    pub devices: Box<dyn DeviceBackend>,
}

// ============================================================================
// Completion
// ============================================================================

/// Pending result of a `begin_attach` / `begin_detach` call.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<Result<(), BackendError>>,
}

/// Backend side of a [`Completion`].
#[derive(Debug)]
pub struct Completer {
    sender: oneshot::Sender<Result<(), BackendError>>,
}

impl Completion {
    /// Creates a linked completer/completion pair.
    pub fn pair() -> (Completer, Completion) {
        let (sender, receiver) = oneshot::channel();
        (Completer { sender }, Completion { receiver })
    }

    /// A completion that has already resolved.
    pub fn ready(result: Result<(), BackendError>) -> Self {
        let (completer, completion) = Self::pair();
        completer.complete(result);
        completion
    }

    /// Waits for the backend to finish the operation.
    ///
    /// If the backend drops the completer without answering, the operation
    /// counts as failed.
    pub async fn wait(self) -> Result<(), BackendError> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(BackendError::new("operation abandoned by backend")),
        }
    }
}

impl Completer {
    /// Resolves the linked completion. Ignored if nobody is waiting.
    pub fn complete(self, result: Result<(), BackendError>) {
        let _ = self.sender.send(result);
    }

    /// True once the linked completion has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_delivers_result() {
        let (completer, completion) = Completion::pair();
        tokio::spawn(async move {
            completer.complete(Err(BackendError::new("device busy")));
        });

        let result = completion.wait().await;
        assert_eq!(result, Err(BackendError::new("device busy")));
    }

    #[tokio::test]
    async fn test_ready_completion() {
        assert!(Completion::ready(Ok(())).wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_completer_is_failure() {
        let (completer, completion) = Completion::pair();
        drop(completer);

        let err = completion.wait().await.unwrap_err();
        assert_eq!(err.message(), "operation abandoned by backend");
    }

    #[test]
    fn test_completer_sees_dropped_completion() {
        let (completer, completion) = Completion::pair();
        assert!(!completer.is_abandoned());

        drop(completion);
        assert!(completer.is_abandoned());
    }

    #[test]
    fn test_complete_after_receiver_dropped_is_ignored() {
        let (completer, completion) = Completion::pair();
        drop(completion);
        completer.complete(Ok(()));
    }
}
