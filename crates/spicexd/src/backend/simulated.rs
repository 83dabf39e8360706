//! Simulated remote session and device manager.
//!
//! Used by the shipped binary and by the test suites:
//! - [`SimulatedBackend`] serves devices from a TOML [`Fixture`] and
//!   completes attach/detach after a configurable delay
//! - [`SimulatedSession`] keeps a TCP connection to the endpoint open and
//!   reports the main channel closed when the endpoint hangs up
//!
//! # Fixture format
//!
//! ```toml
//! completion_delay_ms = 20
//!
//! [[devices]]
//! description = "Logitech|USB Receiver|1-2|046d|c52b"
//! redirectable = true
//! attached = false
//! # check_error = "redirect check fails with this message"
//! # fail_with = "attach/detach completes with this error"
//! # hang = true   # completion never resolves
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use spicex_core::{
    ChannelEvent, ChannelId, ChannelKind, DeviceId, Endpoint, SessionEvent, MAIN_CHANNEL_ID,
};

use super::{BackendError, Completer, Completion, DeviceBackend, SessionControl, SessionLink};
use crate::config::ConfigError;
use crate::session::SessionError;

/// Buffer for session events
const EVENT_BUFFER: usize = 32;

// ============================================================================
// Fixture
// ============================================================================

/// Device list served by the simulated backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    /// Delay before attach/detach completes
    #[serde(default)]
    pub completion_delay_ms: u64,

    #[serde(default)]
    pub devices: Vec<FixtureDevice>,
}

/// One simulated USB device.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureDevice {
    pub description: String,

    #[serde(default = "default_redirectable")]
    pub redirectable: bool,

    #[serde(default)]
    pub attached: bool,

    /// Makes the redirect check fail with this message
    #[serde(default)]
    pub check_error: Option<String>,

    /// Makes attach/detach complete with this error
    #[serde(default)]
    pub fail_with: Option<String>,

    /// Attach/detach never completes
    #[serde(default)]
    pub hang: bool,
}

fn default_redirectable() -> bool {
    true
}

impl FixtureDevice {
    /// A redirectable device with no injected failures.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            redirectable: true,
            attached: false,
            check_error: None,
            fail_with: None,
            hang: false,
        }
    }

    pub fn redirectable(mut self, redirectable: bool) -> Self {
        self.redirectable = redirectable;
        self
    }

    pub fn attached(mut self, attached: bool) -> Self {
        self.attached = attached;
        self
    }

    pub fn check_error(mut self, message: impl Into<String>) -> Self {
        self.check_error = Some(message.into());
        self
    }

    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

impl Fixture {
    pub fn new(devices: Vec<FixtureDevice>) -> Self {
        Self {
            completion_delay_ms: 0,
            devices,
        }
    }

    /// Parses a fixture from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads a fixture file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// Device Backend
// ============================================================================

#[derive(Debug)]
struct SimDevice {
    id: DeviceId,
    config: FixtureDevice,
}

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<SimDevice>,
    next_id: u64,
    unavailable: bool,
    /// Completers of hanging operations, kept alive so they never resolve
    parked: Vec<Completer>,
}

impl SimState {
    fn device(&self, id: DeviceId) -> Option<&SimDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn device_mut(&mut self, id: DeviceId) -> Option<&mut SimDevice> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    fn push(&mut self, config: FixtureDevice) -> DeviceId {
        self.next_id += 1;
        let id = DeviceId::new(self.next_id);
        self.devices.push(SimDevice { id, config });
        id
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    enumerate: AtomicUsize,
    attach: AtomicUsize,
    detach: AtomicUsize,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixture-driven implementation of [`DeviceBackend`].
pub struct SimulatedBackend {
    state: Shared,
    calls: Arc<CallCounters>,
    delay: Duration,
}

impl SimulatedBackend {
    pub fn new(fixture: Fixture) -> Self {
        let mut state = SimState::default();
        for device in fixture.devices {
            state.push(device);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            calls: Arc::new(CallCounters::default()),
            delay: Duration::from_millis(fixture.completion_delay_ms),
        }
    }

    /// Returns a handle for inspecting and changing the backend after it has
    /// been moved into the registry.
    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Arc::clone(&self.state),
            calls: Arc::clone(&self.calls),
        }
    }

    fn begin(&mut self, device: DeviceId, attach: bool) -> Completion {
        let (fail_with, hang) = {
            let state = lock(&self.state);
            match state.device(device) {
                Some(d) => (d.config.fail_with.clone(), d.config.hang),
                None => return Completion::ready(Err(BackendError::new("no such device"))),
            }
        };

        let (completer, completion) = Completion::pair();
        if hang {
            let mut state = lock(&self.state);
            state.parked.retain(|parked| !parked.is_abandoned());
            state.parked.push(completer);
            return completion;
        }

        let state = Arc::clone(&self.state);
        let delay = self.delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match fail_with {
                Some(message) => Err(BackendError::new(message)),
                None => {
                    if let Some(d) = lock(&state).device_mut(device) {
                        d.config.attached = attach;
                    }
                    Ok(())
                }
            };
            completer.complete(result);
        });
        completion
    }
}

impl DeviceBackend for SimulatedBackend {
    fn devices(&mut self) -> Result<Vec<DeviceId>, BackendError> {
        self.calls.enumerate.fetch_add(1, Ordering::Relaxed);
        let state = lock(&self.state);
        if state.unavailable {
            return Err(BackendError::new("device enumeration failed"));
        }
        Ok(state.devices.iter().map(|d| d.id).collect())
    }

    fn description(&self, device: DeviceId) -> String {
        lock(&self.state)
            .device(device)
            .map(|d| d.config.description.clone())
            .unwrap_or_default()
    }

    fn can_redirect(&self, device: DeviceId) -> Result<bool, BackendError> {
        let state = lock(&self.state);
        let d = state
            .device(device)
            .ok_or_else(|| BackendError::new("no such device"))?;
        match &d.config.check_error {
            Some(message) => Err(BackendError::new(message.clone())),
            None => Ok(d.config.redirectable),
        }
    }

    fn is_attached(&self, device: DeviceId) -> bool {
        lock(&self.state)
            .device(device)
            .is_some_and(|d| d.config.attached)
    }

    fn begin_attach(&mut self, device: DeviceId) -> Completion {
        self.calls.attach.fetch_add(1, Ordering::Relaxed);
        self.begin(device, true)
    }

    fn begin_detach(&mut self, device: DeviceId) -> Completion {
        self.calls.detach.fetch_add(1, Ordering::Relaxed);
        self.begin(device, false)
    }
}

/// Cheap-to-clone view into a [`SimulatedBackend`].
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Shared,
    calls: Arc<CallCounters>,
}

impl SimulatedHandle {
    /// Number of `begin_attach` calls so far.
    pub fn attach_calls(&self) -> usize {
        self.calls.attach.load(Ordering::Relaxed)
    }

    /// Number of `begin_detach` calls so far.
    pub fn detach_calls(&self) -> usize {
        self.calls.detach.load(Ordering::Relaxed)
    }

    /// Number of enumerations so far.
    pub fn enumerate_calls(&self) -> usize {
        self.calls.enumerate.load(Ordering::Relaxed)
    }

    /// Number of hanging operations whose caller is still waiting.
    pub fn parked_operations(&self) -> usize {
        lock(&self.state)
            .parked
            .iter()
            .filter(|parked| !parked.is_abandoned())
            .count()
    }

    /// Attached flag of the device at a 0-based fixture position.
    pub fn is_attached(&self, position: usize) -> Option<bool> {
        lock(&self.state)
            .devices
            .get(position)
            .map(|d| d.config.attached)
    }

    /// Makes enumeration fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    /// Plugs in a new device at the end of the list.
    pub fn plug(&self, device: FixtureDevice) -> DeviceId {
        lock(&self.state).push(device)
    }

    /// Unplugs the device at a 0-based position.
    pub fn unplug(&self, position: usize) -> bool {
        let mut state = lock(&self.state);
        if position < state.devices.len() {
            state.devices.remove(position);
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Remote session that only checks the endpoint is reachable.
///
/// Connect opens a TCP connection to the endpoint. The session announces a
/// main channel and two USB-redirection channels. Once the USB-redirection
/// channel 0 is connected, it is reported open, and it is reported closed
/// when the endpoint closes the TCP connection.
pub struct SimulatedSession {
    stream: Option<TcpStream>,
    events: mpsc::Sender<SessionEvent>,
    hangup: CancellationToken,
}

impl SimulatedSession {
    /// Connects to the endpoint and returns the session link.
    ///
    /// # Errors
    ///
    /// `SessionError::Connect` if the endpoint cannot be reached.
    pub async fn connect(
        endpoint: &Endpoint,
        backend: SimulatedBackend,
    ) -> Result<SessionLink, SessionError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| SessionError::Connect {
                uri: endpoint.uri(),
                reason: e.to_string(),
            })?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        for (id, kind) in [
            (MAIN_CHANNEL_ID, ChannelKind::Main),
            (MAIN_CHANNEL_ID, ChannelKind::UsbRedir),
            (ChannelId::new(1), ChannelKind::UsbRedir),
        ] {
            let _ = events_tx.try_send(SessionEvent::ChannelNew { id, kind });
        }

        info!(uri = %endpoint.uri(), "Simulated session connected");

        let control = Self {
            stream: Some(stream),
            events: events_tx,
            hangup: CancellationToken::new(),
        };

        Ok(SessionLink {
            control: Box::new(control),
            events: events_rx,
            devices: Box::new(backend),
        })
    }
}

impl SessionControl for SimulatedSession {
    fn connect_channel(&mut self, channel: ChannelId) -> Result<(), BackendError> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| BackendError::new("channel already connected"))?;

        let events = self.events.clone();
        let hangup = self.hangup.clone();
        let _ = events.try_send(SessionEvent::Channel {
            id: channel,
            event: ChannelEvent::Opened,
        });

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                tokio::select! {
                    _ = hangup.cancelled() => return,
                    read = stream.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => debug!(bytes = n, "Discarding endpoint traffic"),
                    },
                }
            }
            let _ = events
                .send(SessionEvent::Channel {
                    id: channel,
                    event: ChannelEvent::Closed,
                })
                .await;
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.hangup.cancel();
        self.stream = None;
    }
}
