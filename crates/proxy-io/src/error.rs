//! Error types for the proxy runtime.

use proxy_core::FrameError;
use std::io;
use thiserror::Error;

/// Errors surfaced by proxy startup and the framing layer.
///
/// Startup errors (`Bind`, `Connect`, `ConnectTimeout`, `Runtime`) are
/// returned to whoever called `start`. Per-connection errors are logged by
/// the owning task and never escape it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to downstream device {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to downstream device {addr} after {timeout_ms} ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to start control server on {addr}: {reason}")]
    Control { addr: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}

impl ProxyError {
    /// Startup failures that mean the proxy never came up.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            ProxyError::Bind { .. }
                | ProxyError::Connect { .. }
                | ProxyError::ConnectTimeout { .. }
                | ProxyError::Runtime(_)
        )
    }
}
