//! Property-based tests for tag recognition
//!
//! 1. **Reordering**: any delivery order of streams that fit the window is
//!    accepted in full
//! 2. **No replay**: a delivered tag is never accepted again

mod common;

use common::{ManualEnv, contact, root_key, tcp, tcp_config, time_in_period};
use proptest::prelude::*;
use tagwarden_core::{MemoryStorage, Storage, TransportKeyEngine};
use tagwarden_crypto::{HkdfTransportCrypto, TransportCrypto};
use tagwarden_proto::PROTOCOL_VERSION;

type Engine = TransportKeyEngine<MemoryStorage, HkdfTransportCrypto, ManualEnv>;

fn engine(env: &ManualEnv) -> Engine {
    let storage = MemoryStorage::new();
    storage.add_transport(&tcp(), common::MAX_LATENCY).unwrap();
    let engine = TransportKeyEngine::new(&tcp_config(), storage, HkdfTransportCrypto, env.clone());
    engine.start().unwrap();
    engine
}

/// A shuffled order of stream numbers `0..16`.
fn delivery_order() -> impl Strategy<Value = Vec<usize>> {
    Just((0..16).collect::<Vec<usize>>()).prop_shuffle()
}

#[test]
fn prop_any_order_within_window_accepted_once() {
    proptest!(ProptestConfig::with_cases(32), |(order in delivery_order(), seed in any::<u8>())| {
        let env = ManualEnv::new(time_in_period(7, 0));
        let alice = engine(&env);
        let bob = engine(&env);
        alice.add_rotation_keys(contact(2), &root_key(seed), env.now_ms(), true, true).unwrap();
        bob.add_rotation_keys(contact(1), &root_key(seed), env.now_ms(), false, false).unwrap();

        let tags: Vec<_> = (0..16)
            .map(|_| {
                let ctx = alice.get_outgoing_stream_context(contact(2)).unwrap().unwrap();
                HkdfTransportCrypto.encode_tag(&ctx.tag_key, PROTOCOL_VERSION, ctx.stream_number)
            })
            .collect();

        for &i in &order {
            let ctx = bob.get_incoming_stream_context(&tags[i]).unwrap();
            prop_assert_eq!(ctx.map(|c| c.stream_number), Some(i as u32));
        }
        for tag in &tags {
            prop_assert!(bob.get_incoming_stream_context(tag).unwrap().is_none());
        }
    });
}
