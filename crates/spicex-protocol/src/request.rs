//! Client request parsing.
//!
//! Parsing is total: every byte sequence maps to exactly one
//! [`ClientRequest`] or a [`ParseError`], and every `ParseError` is reported
//! to the client as `RequestError::InvalidFormat`.

use std::fmt;

use spicex_core::{Action, DeviceIndex, RequestError};
use thiserror::Error;

/// Maximum number of request bytes accepted in a single read.
pub const MAX_REQUEST_SIZE: usize = 63;

/// A parsed client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// List all devices of a fresh snapshot
    List,
    /// Attach the device at this snapshot index
    Attach(DeviceIndex),
    /// Detach the device at this snapshot index
    Detach(DeviceIndex),
}

impl ClientRequest {
    /// Parses a raw request.
    ///
    /// A single trailing `\n` or `\r\n` is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() > MAX_REQUEST_SIZE {
            return Err(ParseError::TooLarge { size: bytes.len() });
        }

        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        let text = strip_line_ending(text);
        if text.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut tokens = text.split(':');
        let verb = tokens.next().unwrap_or_default();
        let action = match verb {
            "list" => return Ok(Self::List),
            "attach" => Action::Attach,
            "detach" => Action::Detach,
            other => return Err(ParseError::UnknownVerb(other.to_string())),
        };

        let token = tokens.next().ok_or(ParseError::MissingIndex)?;
        let index = parse_index(token)?;

        Ok(Self::for_action(action, index))
    }

    /// Builds the request for a device operation.
    pub fn for_action(action: Action, index: DeviceIndex) -> Self {
        match action {
            Action::Attach => Self::Attach(index),
            Action::Detach => Self::Detach(index),
        }
    }

    /// Returns the action and target for attach/detach requests.
    pub fn operation(&self) -> Option<(Action, DeviceIndex)> {
        match *self {
            Self::List => None,
            Self::Attach(index) => Some((Action::Attach, index)),
            Self::Detach(index) => Some((Action::Detach, index)),
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Attach(index) => write!(f, "attach:{index}"),
            Self::Detach(index) => write!(f, "detach:{index}"),
        }
    }
}

fn strip_line_ending(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

/// Parses a positive decimal index made only of ASCII digits.
fn parse_index(token: &str) -> Result<DeviceIndex, ParseError> {
    let bad_index = || ParseError::BadIndex(token.to_string());

    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad_index());
    }
    let raw: u32 = token.parse().map_err(|_| bad_index())?;
    DeviceIndex::new(raw).ok_or_else(bad_index)
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty request")]
    Empty,

    #[error("request too large: {size} bytes (max: {})", MAX_REQUEST_SIZE)]
    TooLarge { size: usize },

    #[error("request is not valid UTF-8")]
    NotUtf8,

    #[error("unknown verb: {0:?}")]
    UnknownVerb(String),

    #[error("missing device index")]
    MissingIndex,

    #[error("invalid device index: {0:?}")]
    BadIndex(String),
}

impl From<ParseError> for RequestError {
    fn from(_: ParseError) -> Self {
        RequestError::InvalidFormat
    }
}
