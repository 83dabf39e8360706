//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Reads one request with a single read
//! - Routes it to the registry, or hands the connection to the tracker
//! - Writes exactly one response and closes
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use spicex_core::{Action, DeviceIndex, RequestError};
use spicex_protocol::{ClientRequest, ParseError, Response, MAX_REQUEST_SIZE};

use crate::context::DaemonContext;

/// Read buffer size. A read that fills it is an oversized request.
const READ_BUFFER_SIZE: usize = MAX_REQUEST_SIZE + 1;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler {
    stream: UnixStream,

    /// Shared daemon state
    context: DaemonContext,

    /// Unique number for this connection, used in logs
    connection_number: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted Unix stream
    /// * `context` - Shared daemon context
    /// * `connection_number` - Unique number for this connection
    pub fn new(stream: UnixStream, context: DaemonContext, connection_number: u64) -> Self {
        Self {
            stream,
            context,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Returns once the response has been written and the connection closed.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "New client connected");

        let request = match self.read_request().await {
            Ok(request) => request,
            Err(ConnectionError::Parse(e)) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Invalid request"
                );
                self.reply(Response::Rejected(RequestError::InvalidFormat))
                    .await;
                return;
            }
            Err(e) => {
                debug!(
                    connection = self.connection_number,
                    error = %e,
                    "Connection closed before a request was read"
                );
                return;
            }
        };

        debug!(
            connection = self.connection_number,
            request = %request,
            "Received request"
        );

        match request.operation() {
            None => self.handle_list().await,
            Some((action, index)) => self.handle_operation(action, index).await,
        }
    }

    /// Writes the current device listing.
    async fn handle_list(mut self) {
        let response = match self.context.registry.snapshot().await {
            Ok(snapshot) => {
                debug!(
                    connection = self.connection_number,
                    devices = snapshot.len(),
                    "Sending device list"
                );
                Response::Listing(snapshot)
            }
            Err(e) => {
                warn!(connection = self.connection_number, error = %e, "List request failed");
                Response::Rejected(e)
            }
        };
        self.reply(response).await;
    }

    /// Starts an attach/detach and waits for its outcome.
    async fn handle_operation(mut self, action: Action, index: DeviceIndex) {
        let started = match self.context.registry.begin(action, index).await {
            Ok(started) => started,
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    index = %index,
                    action = %action,
                    error = %e,
                    "Request rejected"
                );
                self.reply(Response::Rejected(e)).await;
                return;
            }
        };

        let Self {
            stream,
            context,
            connection_number,
        } = self;

        let outcome = context
            .tracker
            .begin(connection_number, stream, started)
            .complete()
            .await;

        info!(
            connection = connection_number,
            index = %index,
            action = %action,
            success = outcome.is_success(),
            "Request completed"
        );
    }

    /// Reads a single request from the client.
    async fn read_request(&mut self) -> Result<ClientRequest, ConnectionError> {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        let bytes_read = self
            .stream
            .read(&mut buf)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let bytes = buf.get(..bytes_read).unwrap_or_default();
        Ok(ClientRequest::parse(bytes)?)
    }

    /// Writes the response and closes.
    async fn reply(&mut self, response: Response) {
        if let Err(e) = send_response(&mut self.stream, &response).await {
            debug!(
                connection = self.connection_number,
                error = %e,
                "Failed to send response"
            );
        }
    }
}

/// Writes a complete response with a single write, then shuts down the
/// write side of the stream.
pub(crate) async fn send_response<W>(
    writer: &mut W,
    response: &Response,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = response.encode();

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use spicex_protocol::Outcome;
    use tokio::io::duplex;

    #[test]
    fn test_read_buffer_detects_oversized_requests() {
        assert_eq!(READ_BUFFER_SIZE, 64);
        let full = [b'a'; READ_BUFFER_SIZE];
        assert!(matches!(
            ClientRequest::parse(&full),
            Err(ParseError::TooLarge { size: 64 })
        ));
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::from(ParseError::Empty);
        assert!(err.to_string().starts_with("Parse error"));
        assert_eq!(ConnectionError::WriteTimeout.to_string(), "Write timeout");
    }

    #[tokio::test]
    async fn test_send_response_writes_and_closes() {
        let (mut client, mut server) = duplex(64);

        send_response(&mut server, &Response::Rejected(RequestError::InvalidFormat))
            .await
            .unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"Invalid message format");
    }

    #[tokio::test]
    async fn test_send_response_outcome_token() {
        let (mut client, mut server) = duplex(64);

        send_response(&mut server, &Response::Completed(Outcome::Failure))
            .await
            .unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 8);
        assert_eq!(Outcome::from_token(&received), Some(Outcome::Failure));
    }
}
