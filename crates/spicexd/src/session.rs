//! Session lifecycle manager.
//!
//! Owns the remote session for the whole daemon lifetime. Adopts the main
//! USB-redirection channel and follows its events. When that channel closes
//! (or the event stream ends) the session is disconnected and the shared
//! shutdown token is cancelled, which stops the whole daemon without
//! draining in-flight client responses.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel connect failures are logged, never fatal

use std::ops::ControlFlow;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use spicex_core::{Endpoint, Session, SessionEvent, SessionState, Transition};

use crate::backend::SessionControl;

/// Errors from establishing the remote session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unable to connect to {uri}: {reason}")]
    Connect { uri: String, reason: String },
}

/// Drives the session state machine from channel events.
pub struct SessionManager {
    session: Session,
    control: Box<dyn SessionControl>,
    events: mpsc::Receiver<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        endpoint: Endpoint,
        control: Box<dyn SessionControl>,
        events: mpsc::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session: Session::new(endpoint),
            control,
            events,
            shutdown,
        }
    }

    /// Runs until the main channel closes or shutdown is requested.
    ///
    /// Always leaves the session disconnected and the shutdown token
    /// cancelled. Returns the final session state.
    pub async fn run(mut self) -> Session {
        info!(
            uri = %self.session.endpoint(),
            state = %self.state(),
            "Session manager starting"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Session manager shutdown requested");
                    break;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("Session event stream ended");
                        break;
                    };
                    if self.handle_event(event).is_break() {
                        break;
                    }
                }
            }
        }

        if self.session.close() {
            info!("Remote session disconnected");
            self.control.disconnect();
        }
        self.shutdown.cancel();
        self.session
    }

    /// Applies one event. Breaks when the daemon must stop.
    fn handle_event(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match self.session.on_event(event) {
            Transition::Ignore => {
                debug!(?event, "Ignoring session event");
            }
            Transition::AdoptChannel(id) => match self.control.connect_channel(id) {
                Ok(()) => info!(channel = %id, "Remote session established"),
                Err(e) => warn!(channel = %id, error = %e, "Failed to connect main channel"),
            },
            Transition::Opened => info!("main channel: opened"),
            Transition::Switching => info!("main channel: switching host"),
            Transition::ConnectFailed => info!("main channel: failed to connect"),
            Transition::Unhandled(code) => {
                warn!(code, "unhandled main channel event");
            }
            Transition::Shutdown => {
                info!("main channel: closed");
                info!("Remote session disconnected");
                self.control.disconnect();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }
}
