#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tagwarden_crypto::{IncomingKeys, TransportKeys};
use tagwarden_proto::{KeySetId, OwnerId, TransportId};

use super::{Storage, StorageError};
use crate::keys::TransportKeySet;

/// In-memory storage implementation for testing and simulation
///
/// Key sets live in a `BTreeMap` keyed by id so listings come back in
/// creation order. All state is wrapped in Arc<Mutex<>> to allow Clone and
/// concurrent access; `lock().expect()` panics if the mutex is poisoned,
/// which is acceptable for test code.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

struct MemoryStorageInner {
    /// Registered transports and their maximum latency
    transports: HashMap<TransportId, Duration>,

    /// Every key set on every transport
    key_sets: BTreeMap<KeySetId, TransportKeySet>,

    /// Next identifier to hand out, never reused
    next_key_set_id: u32,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageInner {
                transports: HashMap::new(),
                key_sets: BTreeMap::new(),
                next_key_set_id: 1,
            })),
        }
    }

    /// Total number of key sets across all transports.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn key_set_count(&self) -> usize {
        self.lock().key_sets.len()
    }

    /// Registered latency of `transport`, if any.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn transport_latency(&self, transport: &TransportId) -> Option<Duration> {
        self.lock().transports.get(transport).copied()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().expect("Mutex poisoned")
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageInner {
    fn key_set_mut(
        &mut self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<&mut TransportKeySet, StorageError> {
        match self.key_sets.get_mut(&key_set_id) {
            Some(set) if &set.keys.transport_id == transport => Ok(set),
            _ => Err(StorageError::KeySetNotFound { transport: transport.clone(), key_set_id }),
        }
    }
}

fn incoming_for_period(keys: &mut TransportKeys, period: u64) -> Option<&mut IncomingKeys> {
    [&mut keys.previous_incoming, &mut keys.current_incoming, &mut keys.next_incoming]
        .into_iter()
        .find(|incoming| incoming.period == period)
}

impl Storage for MemoryStorage {
    fn contains_transport(&self, transport: &TransportId) -> Result<bool, StorageError> {
        Ok(self.lock().transports.contains_key(transport))
    }

    fn add_transport(
        &self,
        transport: &TransportId,
        max_latency: Duration,
    ) -> Result<(), StorageError> {
        self.lock().transports.entry(transport.clone()).or_insert(max_latency);
        Ok(())
    }

    fn get_transport_keys(
        &self,
        transport: &TransportId,
    ) -> Result<Vec<TransportKeySet>, StorageError> {
        let inner = self.lock();
        if !inner.transports.contains_key(transport) {
            return Err(StorageError::TransportNotFound { transport: transport.clone() });
        }

        Ok(inner
            .key_sets
            .values()
            .filter(|set| &set.keys.transport_id == transport)
            .cloned()
            .collect())
    }

    fn add_transport_keys(
        &self,
        owner: OwnerId,
        keys: &TransportKeys,
    ) -> Result<KeySetId, StorageError> {
        let mut inner = self.lock();
        if !inner.transports.contains_key(&keys.transport_id) {
            return Err(StorageError::TransportNotFound { transport: keys.transport_id.clone() });
        }

        let key_set_id = KeySetId(inner.next_key_set_id);
        inner.next_key_set_id = inner
            .next_key_set_id
            .checked_add(1)
            .ok_or_else(|| StorageError::Io("key set identifiers exhausted".to_string()))?;

        inner.key_sets.insert(key_set_id, TransportKeySet { key_set_id, owner, keys: keys.clone() });
        Ok(key_set_id)
    }

    fn update_transport_keys(&self, sets: &[TransportKeySet]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        for set in sets {
            if let Some(stored) = inner.key_sets.get_mut(&set.key_set_id) {
                debug_assert_eq!(stored.keys.transport_id, set.keys.transport_id);
                stored.keys = set.keys.clone();
            }
        }
        Ok(())
    }

    fn set_transport_keys_active(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.key_set_mut(transport, key_set_id)?.keys.current_outgoing.active = true;
        Ok(())
    }

    fn set_reordering_window(
        &self,
        key_set_id: KeySetId,
        transport: &TransportId,
        period: u64,
        base: u64,
        bitmap: &[u8],
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let set = inner.key_set_mut(transport, key_set_id)?;
        if let Some(incoming) = incoming_for_period(&mut set.keys, period) {
            incoming.window_base = base;
            incoming.window_bitmap = bitmap.to_vec();
        }
        Ok(())
    }

    fn increment_stream_counter(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let outgoing = &mut inner.key_set_mut(transport, key_set_id)?.keys.current_outgoing;
        outgoing.stream_counter = outgoing.stream_counter.saturating_add(1);
        Ok(())
    }

    fn remove_transport_keys(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.key_set_mut(transport, key_set_id)?;
        inner.key_sets.remove(&key_set_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tagwarden_crypto::{HkdfTransportCrypto, SecretKey, TransportCrypto};
    use tagwarden_proto::ContactId;

    use super::*;

    fn tcp() -> TransportId {
        TransportId::new("tcp").unwrap()
    }

    fn keys_for(transport: &TransportId) -> TransportKeys {
        HkdfTransportCrypto::new()
            .derive_rotation_keys(transport, &SecretKey::from_bytes([1; 32]), 10, true, false)
            .unwrap()
    }

    #[test]
    fn add_transport_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.add_transport(&tcp(), Duration::from_secs(1)).unwrap();
        storage.add_transport(&tcp(), Duration::from_secs(9)).unwrap();

        assert!(storage.contains_transport(&tcp()).unwrap());
        assert_eq!(storage.transport_latency(&tcp()), Some(Duration::from_secs(1)));
    }

    #[test]
    fn keys_need_registered_transport() {
        let storage = MemoryStorage::new();
        let result = storage.add_transport_keys(OwnerId::Contact(ContactId(1)), &keys_for(&tcp()));

        assert_eq!(result, Err(StorageError::TransportNotFound { transport: tcp() }));
    }

    #[test]
    fn ids_increase_and_are_not_reused() {
        let storage = MemoryStorage::new();
        storage.add_transport(&tcp(), Duration::from_secs(1)).unwrap();
        let owner = OwnerId::Contact(ContactId(1));

        let first = storage.add_transport_keys(owner, &keys_for(&tcp())).unwrap();
        storage.remove_transport_keys(&tcp(), first).unwrap();
        let second = storage.add_transport_keys(owner, &keys_for(&tcp())).unwrap();

        assert!(second > first);
        assert_eq!(storage.key_set_count(), 1);
    }

    #[test]
    fn listing_filters_by_transport() {
        let storage = MemoryStorage::new();
        let udp = TransportId::new("udp").unwrap();
        storage.add_transport(&tcp(), Duration::from_secs(1)).unwrap();
        storage.add_transport(&udp, Duration::from_secs(1)).unwrap();
        let owner = OwnerId::Contact(ContactId(1));

        storage.add_transport_keys(owner, &keys_for(&tcp())).unwrap();
        storage.add_transport_keys(owner, &keys_for(&udp)).unwrap();

        let sets = storage.get_transport_keys(&tcp()).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].keys.transport_id, tcp());
    }

    #[test]
    fn per_use_updates_touch_only_their_field() {
        let storage = MemoryStorage::new();
        storage.add_transport(&tcp(), Duration::from_secs(1)).unwrap();
        let id = storage.add_transport_keys(OwnerId::Contact(ContactId(1)), &keys_for(&tcp())).unwrap();

        storage.set_transport_keys_active(&tcp(), id).unwrap();
        storage.increment_stream_counter(&tcp(), id).unwrap();
        storage.set_reordering_window(id, &tcp(), 10, 3, &[0x80, 0, 0, 0]).unwrap();
        storage.set_reordering_window(id, &tcp(), 999, 7, &[0xFF; 4]).unwrap();

        let stored = &storage.get_transport_keys(&tcp()).unwrap()[0].keys;
        assert!(stored.current_outgoing.active);
        assert_eq!(stored.current_outgoing.stream_counter, 1);
        assert_eq!(stored.current_incoming.window_base, 3);
        assert_eq!(stored.current_incoming.window_bitmap, vec![0x80, 0, 0, 0]);
        assert_eq!(stored.previous_incoming.window_base, 0);
        assert_eq!(stored.next_incoming.window_base, 0);
    }

    #[test]
    fn update_skips_removed_sets() {
        let storage = MemoryStorage::new();
        storage.add_transport(&tcp(), Duration::from_secs(1)).unwrap();
        let owner = OwnerId::Contact(ContactId(1));
        let id = storage.add_transport_keys(owner, &keys_for(&tcp())).unwrap();
        storage.remove_transport_keys(&tcp(), id).unwrap();

        let ghost = TransportKeySet { key_set_id: id, owner, keys: keys_for(&tcp()) };
        storage.update_transport_keys(&[ghost]).unwrap();

        assert_eq!(storage.key_set_count(), 0);
    }

    #[test]
    fn wrong_transport_is_not_found() {
        let storage = MemoryStorage::new();
        let udp = TransportId::new("udp").unwrap();
        storage.add_transport(&tcp(), Duration::from_secs(1)).unwrap();
        let id = storage.add_transport_keys(OwnerId::Contact(ContactId(1)), &keys_for(&tcp())).unwrap();

        assert_eq!(
            storage.increment_stream_counter(&udp, id),
            Err(StorageError::KeySetNotFound { transport: udp, key_set_id: id })
        );
    }
}
