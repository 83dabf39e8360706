//! spicex Protocol - Wire protocol for the control socket
//!
//! One request per connection, one response, then close:
//!
//! ```text
//! client → daemon   "list" | "attach:<n>" | "detach:<n>"
//! daemon → client   list:            "<n>|<description>|<0|1>|<0|1>\n" per device
//!                   attach / detach: "success\0" | "failure\0" (8 bytes)
//!                   rejected:        free-form diagnostic, e.g. "Device index not found"
//! ```

pub mod request;
pub mod response;

pub use request::{ClientRequest, ParseError, MAX_REQUEST_SIZE};
pub use response::{list_line, Outcome, Response, OUTCOME_TOKEN_LEN};
