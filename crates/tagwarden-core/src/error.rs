//! Error types for the key engine and key manager.
//!
//! "Not found" outcomes (unknown tag, no usable outgoing keys, unregistered
//! transport) are `None`/`false`, never errors. What remains here is caller
//! misuse and failures of the storage or crypto layers underneath.

use tagwarden_crypto::CryptoError;
use tagwarden_proto::{KeySetId, TransportId};
use thiserror::Error;

use crate::{storage::StorageError, window::WindowError};

/// Errors from a per-transport key engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// `start()` called twice
    #[error("key engine for {transport} already started")]
    AlreadyStarted {
        /// Transport of the engine
        transport: TransportId,
    },

    /// Operation named a key set the engine does not hold
    #[error("unknown key set {key_set_id} on transport {transport}")]
    UnknownKeySet {
        /// Transport of the engine
        transport: TransportId,
        /// Key set that was not found
        key_set_id: KeySetId,
    },

    /// Storage operation failed; in-memory state is unchanged
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Key derivation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Persisted or computed window state violated a window precondition
    #[error("window error: {0}")]
    Window(#[from] WindowError),
}

impl KeyError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Only storage I/O failures qualify. Misuse and corrupt key material
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }
}

/// Errors from the [`KeyManager`](crate::KeyManager) facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyManagerError {
    /// `start_service()` called twice
    #[error("key manager already started")]
    AlreadyStarted,

    /// An engine operation failed
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Static key agreement failed
    #[error("key agreement failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Transport registration failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KeyManagerError {
    /// Returns true if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Key(e) => e.is_transient(),
            Self::Storage(e) => e.is_transient(),
            Self::AlreadyStarted | Self::Crypto(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_is_transient() {
        let io = KeyError::Storage(StorageError::Io("disk".to_string()));
        let missing = KeyError::UnknownKeySet {
            transport: TransportId::new("tcp").unwrap(),
            key_set_id: KeySetId(1),
        };

        assert!(io.is_transient());
        assert!(!missing.is_transient());
        assert!(KeyManagerError::from(io).is_transient());
        assert!(!KeyManagerError::AlreadyStarted.is_transient());
    }
}
