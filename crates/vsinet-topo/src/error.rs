//! Error types for vsinet-topo.

use std::path::PathBuf;
use thiserror::Error;
use vsinet_core::{BootResult, CoreError};

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, TopoError>;

/// Errors that can occur while building or running a topology.
#[derive(Debug, Error)]
pub enum TopoError {
    /// Error from a node, link or session
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A node did not boot; the topology has been torn down
    #[error("node {node} failed to boot: {result}")]
    Boot {
        node: String,
        result: BootResult,
        diagnostics: Option<PathBuf>,
    },

    /// No node with this name
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vsinet_env::EnvError> for TopoError {
    fn from(e: vsinet_env::EnvError) -> Self {
        TopoError::Core(CoreError::Env(e))
    }
}
