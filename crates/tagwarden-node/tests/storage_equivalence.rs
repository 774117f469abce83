//! Model equivalence: `RedbStorage` behaves like `MemoryStorage`.
//!
//! Random operation sequences are applied to both; every call must succeed
//! or fail alike and both must end up holding the same key sets.

use std::time::Duration;

use proptest::prelude::*;
use tagwarden_core::{MemoryStorage, Storage, TransportKeySet};
use tagwarden_crypto::{HkdfTransportCrypto, SecretKey, TransportCrypto};
use tagwarden_node::RedbStorage;
use tagwarden_proto::{ContactId, KeySetId, OwnerId, TransportId};
use tempfile::tempdir;

const PERIOD: u64 = 1_000;

#[derive(Debug, Clone)]
enum Op {
    Add { owner: u32, seed: u8, tor: bool },
    Activate { id: u32 },
    Increment { id: u32 },
    Window { id: u32, period_offset: u64, base: u64, bitmap: [u8; 4] },
    Rotate { steps: u64 },
    Remove { id: u32 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..4, any::<u8>(), any::<bool>())
            .prop_map(|(owner, seed, tor)| Op::Add { owner, seed, tor }),
        (0u32..8).prop_map(|id| Op::Activate { id }),
        (0u32..8).prop_map(|id| Op::Increment { id }),
        (0u32..8, 0u64..4, 0u64..100, any::<[u8; 4]>())
            .prop_map(|(id, period_offset, base, bitmap)| Op::Window {
                id,
                period_offset,
                base,
                bitmap,
            }),
        (0u64..3).prop_map(|steps| Op::Rotate { steps }),
        (0u32..8).prop_map(|id| Op::Remove { id }),
    ]
}

fn tcp() -> TransportId {
    TransportId::new("tcp").unwrap()
}

fn tor() -> TransportId {
    TransportId::new("tor").unwrap()
}

/// Apply `op` and report only whether it succeeded.
fn apply<S: Storage>(storage: &S, op: &Op) -> bool {
    let crypto = HkdfTransportCrypto;
    match op {
        Op::Add { owner, seed, tor: on_tor } => {
            let transport = if *on_tor { tor() } else { tcp() };
            let root = SecretKey::from_bytes([*seed; 32]);
            let keys = crypto.derive_rotation_keys(&transport, &root, PERIOD, true, false).unwrap();
            storage.add_transport_keys(OwnerId::Contact(ContactId(*owner)), &keys).is_ok()
        },
        Op::Activate { id } => storage.set_transport_keys_active(&tcp(), KeySetId(*id)).is_ok(),
        Op::Increment { id } => storage.increment_stream_counter(&tcp(), KeySetId(*id)).is_ok(),
        Op::Window { id, period_offset, base, bitmap } => storage
            .set_reordering_window(KeySetId(*id), &tcp(), PERIOD - 1 + period_offset, *base, bitmap)
            .is_ok(),
        Op::Rotate { steps } => {
            let rotated: Vec<TransportKeySet> = storage
                .get_transport_keys(&tcp())
                .unwrap()
                .into_iter()
                .map(|set| {
                    let period = set.keys.period() + steps;
                    let keys = crypto.update_transport_keys(&set.keys, period).unwrap();
                    TransportKeySet { keys, ..set }
                })
                .collect();
            storage.update_transport_keys(&rotated).is_ok()
        },
        Op::Remove { id } => storage.remove_transport_keys(&tcp(), KeySetId(*id)).is_ok(),
    }
}

fn sorted(mut sets: Vec<TransportKeySet>) -> Vec<TransportKeySet> {
    sets.sort_by_key(|set| set.key_set_id);
    sets
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_redb_matches_memory(ops in prop::collection::vec(op(), 1..40)) {
        let dir = tempdir().unwrap();
        let redb = RedbStorage::open(dir.path().join("model.redb")).unwrap();
        let memory = MemoryStorage::new();

        for (transport, secs) in [(tcp(), 60u64), (tor(), 1_800)] {
            redb.add_transport(&transport, Duration::from_secs(secs)).unwrap();
            memory.add_transport(&transport, Duration::from_secs(secs)).unwrap();
        }

        for op in &ops {
            prop_assert_eq!(apply(&redb, op), apply(&memory, op), "diverged on {:?}", op);
        }

        for transport in [tcp(), tor()] {
            prop_assert_eq!(
                sorted(redb.get_transport_keys(&transport).unwrap()),
                sorted(memory.get_transport_keys(&transport).unwrap())
            );
        }
    }
}
