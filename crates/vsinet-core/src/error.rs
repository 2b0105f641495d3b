//! Error types for vsinet-core.

use crate::session::SessionKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for vsinet-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from vsinet-env
    #[error("environment error: {0}")]
    Env(#[from] vsinet_env::EnvError),

    /// Writing to a session's input failed; the process has likely exited
    #[error("{kind} session write failed: {source}")]
    SessionWrite {
        kind: SessionKind,
        #[source]
        source: std::io::Error,
    },

    /// The session's output reached end of stream
    #[error("{0} session closed by peer")]
    SessionClosed(SessionKind),

    /// No prompt arrived within the session's read timeout
    #[error("{kind} session produced no prompt within {timeout:?}")]
    SessionTimeout { kind: SessionKind, timeout: Duration },

    /// Command text contains the prompt byte or a line break
    #[error("command contains reserved byte {0:#04x}")]
    ReservedByte(u8),

    /// Invalid node or session state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Virtual link could not be created or removed
    #[error("link {a} <-> {b} failed: {reason}")]
    Link { a: String, b: String, reason: String },

    /// Tap device creation exceeded its bound
    #[error("tap device {port} not created within {timeout:?}")]
    PortProvisionTimeout { port: String, timeout: Duration },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
