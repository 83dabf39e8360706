//! In-flight attach/detach bookkeeping.
//!
//! Once the registry has started a backend operation, the connection that
//! asked for it is handed to the tracker as a [`PendingOperation`]. The
//! pending operation owns the stream, so exactly one outcome token can be
//! written to it. Its tracker entry is released when the operation finishes
//! or when the task is dropped on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use spicex_core::{Action, Device, OperationError};
use spicex_protocol::{Outcome, Response};

use crate::backend::Completion;
use crate::registry::StartedOperation;
use crate::server::send_response;

/// Summary of one outstanding operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Connection number the operation belongs to
    pub connection: u64,
    pub action: Action,
    /// Description of the target device
    pub device: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct TrackerInner {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, InFlight>>,
}

impl TrackerInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, InFlight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Correlates in-flight operations with their connections.
///
/// Cheap to clone; all clones share the same entries.
#[derive(Clone, Default)]
pub struct OperationTracker {
    inner: Arc<TrackerInner>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a started operation and takes ownership of its connection.
    pub fn begin<W>(
        &self,
        connection: u64,
        writer: W,
        started: StartedOperation,
    ) -> PendingOperation<W>
    where
        W: AsyncWrite + Unpin,
    {
        let StartedOperation {
            action,
            device,
            completion,
        } = started;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries().insert(
            id,
            InFlight {
                connection,
                action,
                device: device.description.clone(),
                started_at: Utc::now(),
            },
        );
        debug!(connection, action = %action, device = %device.description, "Tracking operation");

        PendingOperation {
            writer,
            connection,
            action,
            device,
            completion,
            entry: TrackerEntry {
                id,
                inner: Arc::clone(&self.inner),
            },
        }
    }

    /// Number of outstanding operations.
    pub fn in_flight(&self) -> usize {
        self.inner.entries().len()
    }

    /// Outstanding operations, oldest first.
    pub fn in_flight_operations(&self) -> Vec<InFlight> {
        let mut operations: Vec<InFlight> = self.inner.entries().values().cloned().collect();
        operations.sort_by_key(|op| op.started_at);
        operations
    }
}

/// Releases a tracker entry when dropped.
struct TrackerEntry {
    id: u64,
    inner: Arc<TrackerInner>,
}

impl Drop for TrackerEntry {
    fn drop(&mut self) {
        self.inner.entries().remove(&self.id);
    }
}

/// An attach/detach waiting for the backend, bound to its connection.
pub struct PendingOperation<W> {
    writer: W,
    connection: u64,
    action: Action,
    device: Device,
    completion: Completion,
    entry: TrackerEntry,
}

impl<W> PendingOperation<W>
where
    W: AsyncWrite + Unpin,
{
    /// Waits for the backend, writes the outcome token and closes the
    /// connection.
    pub async fn complete(self) -> Outcome {
        let Self {
            mut writer,
            connection,
            action,
            device,
            completion,
            entry,
        } = self;

        let outcome = match completion.wait().await {
            Ok(()) => {
                info!(
                    connection,
                    index = %device.index,
                    device = %device.description,
                    action = %action,
                    "Device operation succeeded"
                );
                Outcome::Success
            }
            Err(e) => {
                let err = OperationError::new(action, device.description.as_str(), e.message());
                warn!(connection, index = %device.index, error = %err, "Device operation failed");
                Outcome::Failure
            }
        };

        if let Err(e) = send_response(&mut writer, &Response::Completed(outcome)).await {
            debug!(connection, error = %e, "Failed to deliver operation outcome");
        }

        drop(entry);
        outcome
    }
}
