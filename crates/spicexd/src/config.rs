//! Daemon configuration.
//!
//! Resolved once at startup from CLI flags and the environment:
//! - `SPICEX_SOCKET` overrides the control socket path
//! - `XDG_RUNTIME_DIR` (via `dirs::runtime_dir`) picks the socket directory,
//!   falling back to `/tmp`

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

use spicex_core::Endpoint;

/// Name used for the socket file.
pub const PROGRAM_NAME: &str = "spicex";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "SPICEX_SOCKET";

/// Socket directory when no runtime directory is set.
pub const FALLBACK_RUNTIME_DIR: &str = "/tmp";

/// Default host of the remote display endpoint.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Remote display endpoint
    pub endpoint: Endpoint,

    /// Control socket path
    pub socket_path: PathBuf,

    /// Device fixture for the simulated backend
    pub fixture: Option<PathBuf>,
}

impl DaemonConfig {
    /// Resolves the configuration.
    ///
    /// Socket path precedence: explicit override, then `SPICEX_SOCKET`, then
    /// `<runtime-dir>/spicex-<port>.sock`.
    pub fn resolve(
        host: impl Into<String>,
        port: u16,
        socket_override: Option<PathBuf>,
        fixture: Option<PathBuf>,
    ) -> Self {
        let socket_path = socket_override
            .or_else(|| env::var_os(SOCKET_ENV).map(PathBuf::from))
            .unwrap_or_else(|| socket_path(&runtime_dir(), port));

        Self {
            endpoint: Endpoint::new(host, port),
            socket_path,
            fixture,
        }
    }
}

/// Directory holding per-user runtime files.
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(|| PathBuf::from(FALLBACK_RUNTIME_DIR))
}

/// Per-instance socket path, unique per endpoint port.
pub fn socket_path(runtime_dir: &Path, port: u16) -> PathBuf {
    runtime_dir.join(format!("{PROGRAM_NAME}-{port}.sock"))
}

/// Errors from loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
