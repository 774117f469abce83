//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `TransportNotFound`: Key set filed under an unregistered transport
//! - `KeySetNotFound`: Per-use update for a key set that no longer exists
//! - `Serialization`: Failed to encode/decode data
//! - `Io`: Underlying storage system errors

use tagwarden_proto::{KeySetId, TransportId};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Transport has not been registered
    #[error("transport not found: {transport}")]
    TransportNotFound {
        /// Transport that was not found
        transport: TransportId,
    },

    /// Key set does not exist on this transport
    #[error("key set {key_set_id} not found on transport {transport}")]
    KeySetNotFound {
        /// Transport that was searched
        transport: TransportId,
        /// Key set that was not found
        key_set_id: KeySetId,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
