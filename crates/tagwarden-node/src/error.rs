//! Node error types.

use tagwarden_core::{KeyManagerError, StorageError};
use thiserror::Error;

/// Errors that can stop the node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error (no transports, invalid transport argument).
    ///
    /// Fatal: fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// The key database could not be opened.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The key manager failed to start.
    #[error("key manager error: {0}")]
    KeyManager(#[from] KeyManagerError),

    /// Signal handling or other OS-level I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The async runtime is missing or a startup task failed.
    #[error("runtime error: {0}")]
    Runtime(String),
}
