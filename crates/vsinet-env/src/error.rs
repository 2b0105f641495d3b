//! Error types for vsinet-env.

use thiserror::Error;

/// Result type alias for vsinet-env operations.
pub type Result<T> = std::result::Result<T, EnvError>;

/// Errors that can occur during environment operations.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The container runtime refused to start the environment
    #[error("failed to start environment {id} (exit code {exit_code}): {output}")]
    StartFailure {
        /// Environment identifier
        id: String,
        /// Exit code of the runtime's `run` invocation
        exit_code: i32,
        /// Combined stdout/stderr of the `run` invocation
        output: String,
        /// Tail of the runtime daemon's log, if one could be located
        daemon_log: Vec<String>,
    },

    /// A runtime command exited non-zero
    #[error("runtime command `{command}` failed ({exit_code}): {output}")]
    Runtime {
        /// The command line that failed
        command: String,
        /// Exit code
        exit_code: i32,
        /// Combined output
        output: String,
    },

    /// Inspect output could not be interpreted
    #[error("inspect failed: {0}")]
    Inspect(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Environment is not in expected state
    #[error("invalid environment state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A bounded poll ran past its deadline
    #[error("timed out waiting for {what} after {elapsed:?}")]
    PollDeadline {
        /// What was being waited for
        what: String,
        /// Time spent before giving up
        elapsed: std::time::Duration,
    },

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvError {
    /// Build a [`EnvError::Runtime`] from an argv and its output.
    pub(crate) fn runtime(argv: &[String], exit_code: i32, output: &str) -> Self {
        EnvError::Runtime {
            command: argv.join(" "),
            exit_code,
            output: output.trim().to_string(),
        }
    }
}
