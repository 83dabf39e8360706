//! spicex Core - Shared types for USB redirection control
//!
//! This crate provides the domain types shared between the wire protocol
//! (`spicex-protocol`) and the daemon (`spicexd`):
//! - device snapshots and their request-scoped indices
//! - the attach/detach actions and their preconditions
//! - client-visible request errors and the coarse operation error
//! - remote session and channel lifecycle types
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod action;
pub mod device;
pub mod error;
pub mod session;

// Re-exports for convenience
pub use action::Action;
pub use device::{Device, DeviceId, DeviceIndex, DeviceInfo, DeviceSnapshot};
pub use error::{OperationError, RequestError};
pub use session::{
    ChannelEvent, ChannelId, ChannelKind, Endpoint, Session, SessionEvent, SessionState,
    Transition, MAIN_CHANNEL_ID,
};
