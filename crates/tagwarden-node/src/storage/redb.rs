//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! [`Storage`] call is one write or read transaction, so a key set is never
//! observed half-updated after a crash.

use std::{fmt::Display, path::Path, sync::Arc, time::Duration};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tagwarden_core::{Storage, StorageError, TransportKeySet};
use tagwarden_crypto::{IncomingKeys, TransportKeys};
use tagwarden_proto::{KeySetId, OwnerId, TransportId};

/// Table: transports
/// Key: transport name as UTF-8 bytes
/// Value: CBOR-encoded `StoredTransport`
const TRANSPORTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("transports");

/// Table: key_sets
/// Key: key_set_id as big-endian bytes [4 bytes]
/// Value: CBOR-encoded `TransportKeySet`
const KEY_SETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("key_sets");

/// Table: meta
/// Key: counter name
/// Value: counter value
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_KEY_SET_ID: &str = "next_key_set_id";

/// Transport registration as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredTransport {
    max_latency_ms: u64,
}

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (TRANSPORTS, KEY_SETS, META).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io_error)?;

        let txn = db.begin_write().map_err(io_error)?;
        {
            let _ = txn.open_table(TRANSPORTS).map_err(io_error)?;
            let _ = txn.open_table(KEY_SETS).map_err(io_error)?;
            let _ = txn.open_table(META).map_err(io_error)?;
        }
        txn.commit().map_err(io_error)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Registered latency of `transport`, if registered.
    pub fn transport_latency(
        &self,
        transport: &TransportId,
    ) -> Result<Option<Duration>, StorageError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let table = txn.open_table(TRANSPORTS).map_err(io_error)?;

        match table.get(transport.as_bytes()).map_err(io_error)? {
            Some(value) => {
                let stored: StoredTransport = decode(value.value())?;
                Ok(Some(Duration::from_millis(stored.max_latency_ms)))
            },
            None => Ok(None),
        }
    }

    /// Number of stored key sets across all transports.
    pub fn key_set_count(&self) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let table = txn.open_table(KEY_SETS).map_err(io_error)?;

        let mut count = 0;
        for result in table.iter().map_err(io_error)? {
            result.map_err(io_error)?;
            count += 1;
        }
        Ok(count)
    }

    /// Read a key set, apply `update`, and write it back in one transaction.
    fn modify_key_set(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
        update: impl FnOnce(&mut TransportKeys),
    ) -> Result<(), StorageError> {
        let not_found =
            || StorageError::KeySetNotFound { transport: transport.clone(), key_set_id };
        let txn = self.db.begin_write().map_err(io_error)?;

        {
            let mut table = txn.open_table(KEY_SETS).map_err(io_error)?;
            let key = encode_key_set_key(key_set_id);

            let mut set: TransportKeySet = match table.get(key.as_slice()).map_err(io_error)? {
                Some(value) => decode(value.value())?,
                None => return Err(not_found()),
            };
            if &set.keys.transport_id != transport {
                return Err(not_found());
            }

            update(&mut set.keys);

            let bytes = encode(&set)?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io_error)?;
        }

        txn.commit().map_err(io_error)?;
        Ok(())
    }
}

impl Storage for RedbStorage {
    fn contains_transport(&self, transport: &TransportId) -> Result<bool, StorageError> {
        Ok(self.transport_latency(transport)?.is_some())
    }

    fn add_transport(
        &self,
        transport: &TransportId,
        max_latency: Duration,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;

        {
            let mut table = txn.open_table(TRANSPORTS).map_err(io_error)?;

            if table.get(transport.as_bytes()).map_err(io_error)?.is_some() {
                return Ok(()); // Already registered, keep the original latency
            }

            let max_latency_ms = u64::try_from(max_latency.as_millis()).unwrap_or(u64::MAX);
            let bytes = encode(&StoredTransport { max_latency_ms })?;
            table.insert(transport.as_bytes(), bytes.as_slice()).map_err(io_error)?;
        }

        txn.commit().map_err(io_error)?;
        Ok(())
    }

    fn get_transport_keys(
        &self,
        transport: &TransportId,
    ) -> Result<Vec<TransportKeySet>, StorageError> {
        let txn = self.db.begin_read().map_err(io_error)?;

        let transports = txn.open_table(TRANSPORTS).map_err(io_error)?;
        if transports.get(transport.as_bytes()).map_err(io_error)?.is_none() {
            return Err(StorageError::TransportNotFound { transport: transport.clone() });
        }

        let table = txn.open_table(KEY_SETS).map_err(io_error)?;
        let mut sets = Vec::new();
        for result in table.iter().map_err(io_error)? {
            let (_, value) = result.map_err(io_error)?;
            let set: TransportKeySet = decode(value.value())?;
            if &set.keys.transport_id == transport {
                sets.push(set);
            }
        }

        Ok(sets)
    }

    fn add_transport_keys(
        &self,
        owner: OwnerId,
        keys: &TransportKeys,
    ) -> Result<KeySetId, StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;

        let key_set_id = {
            let transports = txn.open_table(TRANSPORTS).map_err(io_error)?;
            if transports.get(keys.transport_id.as_bytes()).map_err(io_error)?.is_none() {
                return Err(StorageError::TransportNotFound {
                    transport: keys.transport_id.clone(),
                });
            }

            let mut meta = txn.open_table(META).map_err(io_error)?;
            let next = meta.get(NEXT_KEY_SET_ID).map_err(io_error)?.map_or(1, |v| v.value());
            let id = u32::try_from(next)
                .map_err(|_| StorageError::Io("key set identifiers exhausted".to_string()))?;
            meta.insert(NEXT_KEY_SET_ID, next + 1).map_err(io_error)?;

            let key_set_id = KeySetId(id);
            let set = TransportKeySet { key_set_id, owner, keys: keys.clone() };
            let bytes = encode(&set)?;

            let mut table = txn.open_table(KEY_SETS).map_err(io_error)?;
            table
                .insert(encode_key_set_key(key_set_id).as_slice(), bytes.as_slice())
                .map_err(io_error)?;
            key_set_id
        };

        txn.commit().map_err(io_error)?;
        Ok(key_set_id)
    }

    fn update_transport_keys(&self, sets: &[TransportKeySet]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;

        {
            let mut table = txn.open_table(KEY_SETS).map_err(io_error)?;

            for set in sets {
                let key = encode_key_set_key(set.key_set_id);
                // Removed while the update was being computed
                if table.get(key.as_slice()).map_err(io_error)?.is_none() {
                    continue;
                }
                let bytes = encode(set)?;
                table.insert(key.as_slice(), bytes.as_slice()).map_err(io_error)?;
            }
        }

        txn.commit().map_err(io_error)?;
        Ok(())
    }

    fn set_transport_keys_active(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        self.modify_key_set(transport, key_set_id, |keys| keys.current_outgoing.active = true)
    }

    fn set_reordering_window(
        &self,
        key_set_id: KeySetId,
        transport: &TransportId,
        period: u64,
        base: u64,
        bitmap: &[u8],
    ) -> Result<(), StorageError> {
        self.modify_key_set(transport, key_set_id, |keys| {
            if let Some(incoming) = incoming_for_period(keys, period) {
                incoming.window_base = base;
                incoming.window_bitmap = bitmap.to_vec();
            }
        })
    }

    fn increment_stream_counter(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        self.modify_key_set(transport, key_set_id, |keys| {
            keys.current_outgoing.stream_counter =
                keys.current_outgoing.stream_counter.saturating_add(1);
        })
    }

    fn remove_transport_keys(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;

        {
            let mut table = txn.open_table(KEY_SETS).map_err(io_error)?;
            let key = encode_key_set_key(key_set_id);

            let stored: Option<TransportKeySet> =
                match table.get(key.as_slice()).map_err(io_error)? {
                    Some(value) => Some(decode(value.value())?),
                    None => None,
                };
            if stored.is_none_or(|set| &set.keys.transport_id != transport) {
                return Err(StorageError::KeySetNotFound {
                    transport: transport.clone(),
                    key_set_id,
                });
            }

            table.remove(key.as_slice()).map_err(io_error)?;
        }

        txn.commit().map_err(io_error)?;
        Ok(())
    }
}

fn incoming_for_period(keys: &mut TransportKeys, period: u64) -> Option<&mut IncomingKeys> {
    [&mut keys.previous_incoming, &mut keys.current_incoming, &mut keys.next_incoming]
        .into_iter()
        .find(|incoming| incoming.period == period)
}

/// Encode key_set_id as 4-byte big-endian key.
///
/// Lexicographic ordering matches numeric ordering.
fn encode_key_set_key(key_set_id: KeySetId) -> [u8; 4] {
    key_set_id.0.to_be_bytes()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn io_error(e: impl Display) -> StorageError {
    StorageError::Io(e.to_string())
}

#[cfg(test)]
mod tests {
    use tagwarden_crypto::{HkdfTransportCrypto, SecretKey, TransportCrypto};
    use tagwarden_proto::ContactId;
    use tempfile::tempdir;

    use super::*;

    fn tcp() -> TransportId {
        TransportId::new("tcp").unwrap()
    }

    fn keys(seed: u8) -> TransportKeys {
        HkdfTransportCrypto
            .derive_rotation_keys(&tcp(), &SecretKey::from_bytes([seed; 32]), 100, true, false)
            .unwrap()
    }

    fn owner(id: u32) -> OwnerId {
        OwnerId::Contact(ContactId(id))
    }

    fn open() -> (tempfile::TempDir, RedbStorage) {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("keys.redb")).unwrap();
        storage.add_transport(&tcp(), Duration::from_secs(60)).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_key_set_key_ordering() {
        assert!(encode_key_set_key(KeySetId(2)) < encode_key_set_key(KeySetId(256)));
        assert_eq!(encode_key_set_key(KeySetId(0x0102_0304)), [1, 2, 3, 4]);
    }

    #[test]
    fn test_add_transport_is_idempotent() {
        let (_dir, storage) = open();

        storage.add_transport(&tcp(), Duration::from_secs(5)).unwrap();

        assert_eq!(storage.transport_latency(&tcp()).unwrap(), Some(Duration::from_secs(60)));
        assert!(!storage.contains_transport(&TransportId::new("tor").unwrap()).unwrap());
    }

    #[test]
    fn test_key_sets_roundtrip() {
        let (_dir, storage) = open();

        let first = storage.add_transport_keys(owner(1), &keys(1)).unwrap();
        let second = storage.add_transport_keys(owner(2), &keys(2)).unwrap();
        assert_eq!(first, KeySetId(1));
        assert_eq!(second, KeySetId(2));

        let loaded = storage.get_transport_keys(&tcp()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].owner, owner(1));
        assert_eq!(loaded[1].keys, keys(2));
    }

    #[test]
    fn test_unregistered_transport_rejected() {
        let (_dir, storage) = open();
        let tor = TransportId::new("tor").unwrap();

        assert!(matches!(
            storage.get_transport_keys(&tor),
            Err(StorageError::TransportNotFound { .. })
        ));

        let mut tor_keys = keys(1);
        tor_keys.transport_id = tor;
        assert!(matches!(
            storage.add_transport_keys(owner(1), &tor_keys),
            Err(StorageError::TransportNotFound { .. })
        ));
    }

    #[test]
    fn test_per_use_updates() {
        let (_dir, storage) = open();
        let id = storage.add_transport_keys(owner(1), &keys(1)).unwrap();

        storage.set_transport_keys_active(&tcp(), id).unwrap();
        storage.increment_stream_counter(&tcp(), id).unwrap();
        storage.increment_stream_counter(&tcp(), id).unwrap();
        storage.set_reordering_window(id, &tcp(), 99, 7, &[0x80, 0, 0, 0]).unwrap();
        // Period not held by the key set
        storage.set_reordering_window(id, &tcp(), 50, 9, &[0xFF; 4]).unwrap();

        let stored = &storage.get_transport_keys(&tcp()).unwrap()[0].keys;
        assert!(stored.current_outgoing.active);
        assert_eq!(stored.current_outgoing.stream_counter, 2);
        assert_eq!(stored.previous_incoming.window_base, 7);
        assert_eq!(stored.previous_incoming.window_bitmap, vec![0x80, 0, 0, 0]);
        assert_eq!(stored.current_incoming.window_base, 0);
    }

    #[test]
    fn test_update_skips_removed_sets() {
        let (_dir, storage) = open();
        let kept = storage.add_transport_keys(owner(1), &keys(1)).unwrap();
        let removed = storage.add_transport_keys(owner(2), &keys(2)).unwrap();
        storage.remove_transport_keys(&tcp(), removed).unwrap();

        let rotated = HkdfTransportCrypto.update_transport_keys(&keys(1), 101).unwrap();
        storage
            .update_transport_keys(&[
                TransportKeySet { key_set_id: kept, owner: owner(1), keys: rotated.clone() },
                TransportKeySet { key_set_id: removed, owner: owner(2), keys: rotated.clone() },
            ])
            .unwrap();

        let loaded = storage.get_transport_keys(&tcp()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].keys, rotated);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let (_dir, storage) = open();
        let first = storage.add_transport_keys(owner(1), &keys(1)).unwrap();
        storage.remove_transport_keys(&tcp(), first).unwrap();

        let second = storage.add_transport_keys(owner(1), &keys(1)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_wrong_transport_is_not_found() {
        let (_dir, storage) = open();
        let tor = TransportId::new("tor").unwrap();
        storage.add_transport(&tor, Duration::from_secs(600)).unwrap();
        let id = storage.add_transport_keys(owner(1), &keys(1)).unwrap();

        assert!(matches!(
            storage.increment_stream_counter(&tor, id),
            Err(StorageError::KeySetNotFound { .. })
        ));
        assert!(matches!(
            storage.remove_transport_keys(&tor, id),
            Err(StorageError::KeySetNotFound { .. })
        ));
        assert_eq!(storage.key_set_count().unwrap(), 1);
    }
}
