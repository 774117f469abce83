//! Storage abstraction for transport keys
//!
//! Trait-based abstraction for persisting transport registrations and key
//! sets. The trait is synchronous (no async): the key engine calls it while
//! holding its lock, so implementations must not block on the network.
//!
//! Every method is atomic on its own. Multi-key-set updates go through
//! [`Storage::update_transport_keys`], which applies the whole batch or
//! nothing.

mod chaotic;
mod error;
mod memory;

use std::time::Duration;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use tagwarden_crypto::TransportKeys;
use tagwarden_proto::{KeySetId, OwnerId, TransportId};

use crate::keys::TransportKeySet;

/// Storage abstraction for transport registrations and key sets
///
/// Must be Clone (shared by every engine), Send + Sync (engines run rotation
/// on a background executor), and synchronous. Implementations typically
/// share internal state via Arc, so clones access the same underlying
/// storage.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation code, but production implementations should handle
/// poisoned mutexes gracefully.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Whether `transport` has been registered.
    fn contains_transport(&self, transport: &TransportId) -> Result<bool, StorageError>;

    /// Register a transport.
    ///
    /// Idempotent - if the transport already exists, this is a no-op (does
    /// not update the latency).
    fn add_transport(&self, transport: &TransportId, max_latency: Duration)
    -> Result<(), StorageError>;

    /// Load every key set filed under `transport`.
    ///
    /// Order is not guaranteed.
    fn get_transport_keys(&self, transport: &TransportId)
    -> Result<Vec<TransportKeySet>, StorageError>;

    /// Store a new key set and assign it an identifier.
    ///
    /// # Invariants
    ///
    /// - Pre: `keys.transport_id` has been registered
    /// - Post: returned id is greater than every id previously assigned
    fn add_transport_keys(&self, owner: OwnerId, keys: &TransportKeys)
    -> Result<KeySetId, StorageError>;

    /// Overwrite the keys of existing key sets.
    ///
    /// Applied atomically. Key sets that no longer exist are skipped (their
    /// owner was removed while the update was computed).
    fn update_transport_keys(&self, sets: &[TransportKeySet]) -> Result<(), StorageError>;

    /// Mark a key set's outgoing keys active.
    fn set_transport_keys_active(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError>;

    /// Overwrite the reordering window of the incoming keys for `period`.
    ///
    /// A no-op if the key set no longer holds keys for `period`.
    fn set_reordering_window(
        &self,
        key_set_id: KeySetId,
        transport: &TransportId,
        period: u64,
        base: u64,
        bitmap: &[u8],
    ) -> Result<(), StorageError>;

    /// Increment a key set's outgoing stream counter by one.
    fn increment_stream_counter(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError>;

    /// Delete a key set.
    fn remove_transport_keys(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError>;
}
