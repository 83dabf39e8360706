//! Integration tests for the control socket server.
//!
//! These tests drive a real DaemonServer over a Unix socket with the
//! simulated device backend, checking the wire format of every response.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::path::PathBuf;
use std::time::Duration;

use spicexd::backend::simulated::{Fixture, FixtureDevice, SimulatedBackend, SimulatedHandle};
use spicexd::context::DaemonContext;
use spicexd::registry::spawn_registry;
use spicexd::server::DaemonServer;
use spicexd::tracker::OperationTracker;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for a response
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    cancel_token: CancellationToken,
    backend: SimulatedHandle,
    tracker: OperationTracker,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    /// Spawns a server serving the given fixture.
    async fn spawn(fixture: Fixture) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let backend = SimulatedBackend::new(fixture);
        let handle = backend.handle();
        let cancel_token = CancellationToken::new();
        let context = DaemonContext::new(spawn_registry(Box::new(backend)), cancel_token.clone());
        let tracker = context.tracker.clone();

        let server = DaemonServer::bind(&socket_path, context).expect("bind server");
        tokio::spawn(server.run());

        TestServer {
            socket_path,
            cancel_token,
            backend: handle,
            tracker,
            _temp_dir: temp_dir,
        }
    }

    /// Spawns a server with the given devices and no completion delay.
    async fn with_devices(devices: Vec<FixtureDevice>) -> Self {
        Self::spawn(Fixture::new(devices)).await
    }

    async fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server")
    }

    /// Sends one request and returns everything the daemon wrote.
    async fn request(&self, bytes: &[u8]) -> Vec<u8> {
        let mut stream = self.connect().await;
        stream.write_all(bytes).await.expect("send request");
        read_response(&mut stream).await
    }

    /// Sends one request and returns the response as text.
    async fn request_text(&self, bytes: &[u8]) -> String {
        String::from_utf8(self.request(bytes).await).expect("utf-8 response")
    }

    /// Shuts down the server.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Reads until the daemon closes the connection.
async fn read_response(stream: &mut UnixStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match timeout(RESPONSE_TIMEOUT, stream.read(&mut buf))
            .await
            .expect("response timed out")
        {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}

fn two_devices() -> Vec<FixtureDevice> {
    vec![
        FixtureDevice::new("D1"),
        FixtureDevice::new("D2").redirectable(false).attached(true),
    ]
}

// ============================================================================
// List Tests
// ============================================================================

#[tokio::test]
async fn test_list_two_devices() {
    let server = TestServer::with_devices(two_devices()).await;

    let response = server.request(b"list").await;
    assert_eq!(response, b"1|D1|1|0\n2|D2|0|1\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_no_devices_writes_nothing() {
    let server = TestServer::with_devices(vec![]).await;

    assert!(server.request(b"list").await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_indices_follow_backend_order() {
    let devices = (1..=5)
        .map(|n| FixtureDevice::new(format!("Device {n}")))
        .collect();
    let server = TestServer::with_devices(devices).await;

    let text = server.request_text(b"list").await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    for (position, line) in lines.iter().enumerate() {
        let fields: Vec<&str> = line.split('|').collect();
        assert_eq!(fields[0], (position + 1).to_string());
        assert_eq!(fields[1], format!("Device {}", position + 1));
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_keeps_description_separators() {
    let server = TestServer::with_devices(vec![FixtureDevice::new(
        "Logitech|USB Receiver|1-2|046d|c52b",
    )])
    .await;

    let response = server.request_text(b"list").await;
    assert_eq!(response, "1|Logitech|USB Receiver|1-2|046d|c52b|1|0\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_with_trailing_newline() {
    let server = TestServer::with_devices(two_devices()).await;

    assert_eq!(server.request(b"list\n").await, b"1|D1|1|0\n2|D2|0|1\n");
    assert_eq!(server.request(b"list\r\n").await, b"1|D1|1|0\n2|D2|0|1\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_ignores_extra_tokens() {
    let server = TestServer::with_devices(two_devices()).await;

    assert_eq!(server.request(b"list:7:x").await, b"1|D1|1|0\n2|D2|0|1\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_reports_failed_redirect_check_as_not_redirectable() {
    let server = TestServer::with_devices(vec![
        FixtureDevice::new("Broken").check_error("permission denied"),
        FixtureDevice::new("Fine"),
    ])
    .await;

    assert_eq!(server.request(b"list").await, b"1|Broken|0|0\n2|Fine|1|0\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_unavailable_registry() {
    let server = TestServer::with_devices(two_devices()).await;
    server.backend.set_unavailable(true);

    assert_eq!(server.request_text(b"list").await, "Unable to retrieve devices");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_reflects_hotplug() {
    let server = TestServer::with_devices(vec![FixtureDevice::new("D1")]).await;

    server.backend.plug(FixtureDevice::new("D2"));
    assert_eq!(server.request(b"list").await, b"1|D1|1|0\n2|D2|1|0\n");

    assert!(server.backend.unplug(0));
    assert_eq!(server.request(b"list").await, b"1|D2|1|0\n");

    server.shutdown().await;
}

// ============================================================================
// Attach / Detach Tests
// ============================================================================

#[tokio::test]
async fn test_attach_success() {
    let server = TestServer::with_devices(two_devices()).await;

    assert_eq!(server.request(b"attach:1").await, b"success\0");
    assert_eq!(server.backend.attach_calls(), 1);
    assert_eq!(server.backend.is_attached(0), Some(true));

    // The next listing sees the new state
    assert_eq!(server.request(b"list").await, b"1|D1|1|1\n2|D2|0|1\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_detach_success() {
    let server = TestServer::with_devices(vec![FixtureDevice::new("D1").attached(true)]).await;

    assert_eq!(server.request(b"detach:1").await, b"success\0");
    assert_eq!(server.backend.detach_calls(), 1);
    assert_eq!(server.backend.is_attached(0), Some(false));

    server.shutdown().await;
}

#[tokio::test]
async fn test_detach_failure_token() {
    let server = TestServer::with_devices(vec![FixtureDevice::new("D1")
        .attached(true)
        .fail_with("usbredir host went away")])
    .await;

    assert_eq!(server.request(b"detach:1").await, b"failure\0");
    assert_eq!(server.backend.detach_calls(), 1);
    assert_eq!(server.backend.is_attached(0), Some(true));

    server.shutdown().await;
}

#[tokio::test]
async fn test_attach_index_not_found() {
    let server = TestServer::with_devices(two_devices()).await;

    assert_eq!(server.request_text(b"attach:5").await, "Device index not found");
    assert_eq!(server.backend.attach_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_attach_already_attached() {
    let server = TestServer::with_devices(vec![
        FixtureDevice::new("D1").attached(true),
        FixtureDevice::new("D2"),
    ])
    .await;

    assert_eq!(
        server.request_text(b"attach:1").await,
        "Device #1, already attached"
    );
    assert_eq!(server.backend.attach_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_attach_not_redirectable() {
    let server = TestServer::with_devices(two_devices()).await;

    assert_eq!(
        server.request_text(b"attach:2").await,
        "Cannot redirect device #2"
    );
    assert_eq!(server.backend.attach_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_detach_not_attached() {
    let server = TestServer::with_devices(two_devices()).await;

    assert_eq!(server.request_text(b"detach:1").await, "Device #1 not attached");
    assert_eq!(server.backend.detach_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_attach_unavailable_registry() {
    let server = TestServer::with_devices(two_devices()).await;
    server.backend.set_unavailable(true);

    assert_eq!(
        server.request_text(b"attach:1").await,
        "Unable to retrieve devices"
    );
    assert_eq!(server.backend.attach_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_attach_uses_fresh_snapshot() {
    let server = TestServer::with_devices(vec![
        FixtureDevice::new("D1"),
        FixtureDevice::new("D2").attached(true),
    ])
    .await;

    // Index 1 now points at what used to be device 2
    assert!(server.backend.unplug(0));
    assert_eq!(
        server.request_text(b"attach:1").await,
        "Device #1, already attached"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_attach_after_delay() {
    let fixture = Fixture {
        completion_delay_ms: 50,
        ..Fixture::new(vec![FixtureDevice::new("Slow")])
    };
    let server = TestServer::spawn(fixture).await;

    assert_eq!(server.request(b"attach:1").await, b"success\0");
    assert_eq!(server.tracker.in_flight(), 0);

    server.shutdown().await;
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_list_while_operation_in_flight() {
    let server = TestServer::with_devices(vec![
        FixtureDevice::new("Stuck").hang(),
        FixtureDevice::new("D2"),
    ])
    .await;

    let mut pending = server.connect().await;
    pending.write_all(b"attach:1").await.unwrap();

    let start = tokio::time::Instant::now();
    while server.tracker.in_flight() == 0 && start.elapsed() < RESPONSE_TIMEOUT {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.tracker.in_flight(), 1);

    // Other connections are served while the attach waits
    assert_eq!(server.request(b"list").await, b"1|Stuck|1|0\n2|D2|1|0\n");
    assert_eq!(server.request(b"attach:2").await, b"success\0");
    assert_eq!(server.tracker.in_flight(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_operations_each_get_one_response() {
    let fixture = Fixture {
        completion_delay_ms: 20,
        ..Fixture::new((1..=4).map(|n| FixtureDevice::new(format!("D{n}"))).collect())
    };
    let server = TestServer::spawn(fixture).await;

    let mut streams = Vec::new();
    for n in 1..=4 {
        let mut stream = server.connect().await;
        stream
            .write_all(format!("attach:{n}").as_bytes())
            .await
            .unwrap();
        streams.push(stream);
    }

    for stream in streams.iter_mut() {
        assert_eq!(read_response(stream).await, b"success\0");
    }
    assert_eq!(server.backend.attach_calls(), 4);
    assert_eq!(server.tracker.in_flight(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_many_sequential_requests() {
    let server = TestServer::with_devices(two_devices()).await;

    for _ in 0..20 {
        assert_eq!(server.request(b"list").await, b"1|D1|1|0\n2|D2|0|1\n");
    }

    server.shutdown().await;
}
