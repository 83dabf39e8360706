//! spicex Daemon - USB redirection control server
//!
//! This crate provides the core infrastructure for the spicex daemon:
//! - `backend` - Remote session collaborator traits and the simulated backend
//! - `registry` - Device registry actor, sole owner of the device backend
//! - `tracker` - In-flight attach/detach operations
//! - `session` - Remote session lifecycle
//! - `server` - Unix socket server for client connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       spicexd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│     RegistryActor           │   │
//! │  │ (Unix Socket)   │     │  (device backend owner)     │   │
//! │  └────────┬────────┘     └─────────────────────────────┘   │
//! │           │                                                 │
//! │           │ connections                                     │
//! │           ▼                                                 │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│────▶│   OperationTracker          │   │
//! │  │  (per client)   │     │   (pending attach/detach)   │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! │  ┌─────────────────┐                                        │
//! │  │ SessionManager  │──── cancels shutdown on channel close  │
//! │  └─────────────────┘                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod backend;
pub mod config;
pub mod context;
pub mod daemon;
pub mod registry;
pub mod server;
pub mod session;
pub mod tracker;
