//! Shared state handed to every connection task.

use tokio_util::sync::CancellationToken;

use crate::registry::RegistryHandle;
use crate::tracker::OperationTracker;

/// Per-daemon context, cloned into each connection handler.
#[derive(Clone)]
pub struct DaemonContext {
    /// Handle to the device registry actor
    pub registry: RegistryHandle,

    /// In-flight attach/detach operations
    pub tracker: OperationTracker,

    /// Daemon-wide shutdown signal
    pub shutdown: CancellationToken,
}

impl DaemonContext {
    pub fn new(registry: RegistryHandle, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            tracker: OperationTracker::new(),
            shutdown,
        }
    }
}
