//! Daemon responses.
//!
//! Every connection receives exactly one [`Response`], encoded in full and
//! written with a single write before the daemon closes the connection.

use spicex_core::{Device, DeviceSnapshot, RequestError};

/// Length of the `success` / `failure` token on the wire.
pub const OUTCOME_TOKEN_LEN: usize = 8;

const SUCCESS_TOKEN: &[u8; OUTCOME_TOKEN_LEN] = b"success\0";
const FAILURE_TOKEN: &[u8; OUTCOME_TOKEN_LEN] = b"failure\0";

/// Coarse result of an attach/detach the backend accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Fixed-width token, NUL padded to 8 bytes.
    pub fn token(self) -> &'static [u8; OUTCOME_TOKEN_LEN] {
        match self {
            Self::Success => SUCCESS_TOKEN,
            Self::Failure => FAILURE_TOKEN,
        }
    }

    /// Decodes a token read by a client.
    pub fn from_token(bytes: &[u8]) -> Option<Self> {
        if bytes == SUCCESS_TOKEN {
            Some(Self::Success)
        } else if bytes == FAILURE_TOKEN {
            Some(Self::Failure)
        } else {
            None
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// The single terminal response written to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// One line per device
    Listing(DeviceSnapshot),
    /// Request rejected before reaching the backend
    Rejected(RequestError),
    /// Backend finished an attach/detach
    Completed(Outcome),
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Listing(snapshot) => snapshot
                .iter()
                .flat_map(|device| list_line(device).into_bytes())
                .collect(),
            Self::Rejected(err) => err.to_string().into_bytes(),
            Self::Completed(outcome) => outcome.token().to_vec(),
        }
    }
}

/// Formats one listing line: `<index>|<description>|<redirectable>|<attached>\n`.
pub fn list_line(device: &Device) -> String {
    format!(
        "{}|{}|{}|{}\n",
        device.index,
        device.description,
        u8::from(device.redirectable),
        u8::from(device.attached)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use spicex_core::{DeviceId, DeviceIndex, DeviceInfo};

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot::capture(vec![
            DeviceInfo {
                id: DeviceId::new(1),
                description: "D1".to_string(),
                redirectable: true,
                attached: false,
            },
            DeviceInfo {
                id: DeviceId::new(2),
                description: "D2".to_string(),
                redirectable: false,
                attached: true,
            },
        ])
    }

    #[test]
    fn test_listing_format() {
        let encoded = Response::Listing(snapshot()).encode();
        assert_eq!(encoded, b"1|D1|1|0\n2|D2|0|1\n");
    }

    #[test]
    fn test_empty_listing_is_empty() {
        assert!(Response::Listing(DeviceSnapshot::new()).encode().is_empty());
    }

    #[test]
    fn test_description_with_separators_is_kept_verbatim() {
        let snapshot = DeviceSnapshot::capture(vec![DeviceInfo {
            id: DeviceId::new(9),
            description: "Logitech|USB Receiver|1-2|046d|c52b".to_string(),
            redirectable: true,
            attached: true,
        }]);
        let line = list_line(snapshot.resolve(1).unwrap());
        assert_eq!(line, "1|Logitech|USB Receiver|1-2|046d|c52b|1|1\n");
    }

    #[test]
    fn test_outcome_tokens_are_fixed_width() {
        assert_eq!(Outcome::Success.token().len(), OUTCOME_TOKEN_LEN);
        assert_eq!(Outcome::Failure.token().len(), OUTCOME_TOKEN_LEN);
        assert_eq!(&Outcome::Success.token()[..7], b"success");
        assert_eq!(&Outcome::Failure.token()[..7], b"failure");

        assert_eq!(
            Response::Completed(Outcome::Success).encode(),
            b"success\0"
        );
        assert_eq!(Outcome::from_token(b"failure\0"), Some(Outcome::Failure));
        assert_eq!(Outcome::from_token(b"success"), None);
        assert!(Outcome::Success.is_success());
    }

    #[test]
    fn test_rejected_writes_diagnostic() {
        let index = DeviceIndex::new(1).unwrap();
        assert_eq!(
            Response::Rejected(RequestError::AlreadyAttached { index }).encode(),
            b"Device #1, already attached"
        );
        assert_eq!(
            Response::Rejected(RequestError::InvalidFormat).encode(),
            b"Invalid message format"
        );
    }
}
