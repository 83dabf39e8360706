//! Remote session and channel lifecycle.
//!
//! The daemon holds exactly one remote display session. Of all the channels
//! the session announces, only the USB-redirection channel with id 0 is
//! adopted; its events drive the session state machine:
//!
//! ```text
//! Connecting ──Opened──▶ Connected ──Closed──▶ Closed (daemon shuts down)
//!      │                    │
//!      └──Switching / ErrorConnect: logged, no transition
//! ```

use std::fmt;

/// Id of a channel within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u32);

impl ChannelId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of the USB-redirection control channel the daemon adopts.
pub const MAIN_CHANNEL_ID: ChannelId = ChannelId::new(0);

/// Capability type of a session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Main,
    Display,
    Inputs,
    Cursor,
    Playback,
    Record,
    UsbRedir,
}

/// Lifecycle events reported for a subscribed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Closed,
    /// Host failover (migration) in progress
    Switching,
    ErrorConnect,
    /// Event code the daemon has no handling for
    Unknown(u32),
}

/// Events delivered by the remote session library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session created a new channel
    ChannelNew { id: ChannelId, kind: ChannelKind },

    /// A lifecycle event on a channel
    Channel { id: ChannelId, event: ChannelEvent },
}

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Address of the remote display endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Session URI, e.g. `spice://127.0.0.1:5900`.
    pub fn uri(&self) -> String {
        format!("spice://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// What the lifecycle manager must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Event concerns a channel the daemon does not follow
    Ignore,
    /// Connect the channel and follow its events
    AdoptChannel(ChannelId),
    Opened,
    Switching,
    ConnectFailed,
    Unhandled(u32),
    /// Disconnect the session and stop the daemon
    Shutdown,
}

/// The daemon's connection to the remote display endpoint.
#[derive(Debug, Clone)]
pub struct Session {
    endpoint: Endpoint,
    state: SessionState,
    main_channel: Option<ChannelId>,
}

impl Session {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: SessionState::Connecting,
            main_channel: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn main_channel(&self) -> Option<ChannelId> {
        self.main_channel
    }

    /// Applies a session event and returns the action to take.
    pub fn on_event(&mut self, event: SessionEvent) -> Transition {
        if self.state == SessionState::Closed {
            return Transition::Ignore;
        }

        match event {
            SessionEvent::ChannelNew { id, kind } => {
                if kind != ChannelKind::UsbRedir || id != MAIN_CHANNEL_ID {
                    return Transition::Ignore;
                }
                if self.main_channel.is_some() {
                    return Transition::Ignore;
                }
                self.main_channel = Some(id);
                Transition::AdoptChannel(id)
            }
            SessionEvent::Channel { id, event } => {
                if self.main_channel != Some(id) {
                    return Transition::Ignore;
                }
                match event {
                    ChannelEvent::Opened => {
                        self.state = SessionState::Connected;
                        Transition::Opened
                    }
                    ChannelEvent::Closed => {
                        self.state = SessionState::Closed;
                        Transition::Shutdown
                    }
                    ChannelEvent::Switching => Transition::Switching,
                    ChannelEvent::ErrorConnect => Transition::ConnectFailed,
                    ChannelEvent::Unknown(code) => Transition::Unhandled(code),
                }
            }
        }
    }

    /// Marks the session closed. Returns false if it already was.
    pub fn close(&mut self) -> bool {
        let was_open = self.state != SessionState::Closed;
        self.state = SessionState::Closed;
        was_open
    }
}
