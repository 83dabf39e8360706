//! Device registry using Actor pattern.
//!
//! The registry is the single owner of the session's USB device manager.
//! It receives commands via a tokio mpsc channel, so every backend call in
//! the daemon is serialized on one task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  RegistryCommand  ┌─────────────────┐
//! │ConnectionHandler │──────────────────▶│  RegistryActor  │
//! │  (per client)    │◀──────────────────│                 │
//! └──────────────────┘  oneshot reply    └────────┬────────┘
//!                                                 │ owns
//!                                                 ▼
//!                                        ┌─────────────────┐
//!                                        │  DeviceBackend  │
//!                                        └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, StartedOperation};
pub use handle::RegistryHandle;

use crate::backend::DeviceBackend;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
pub fn spawn_registry(backend: Box<dyn DeviceBackend>) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, backend);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
