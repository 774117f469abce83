//! Fuzz target for TransportKeyEngine under storage failures
//!
//! A sending and a receiving engine share a root key. The receiver's storage
//! fails at a fuzzer-chosen rate while the fuzzer mixes outgoing requests,
//! incoming tags (fresh, replayed and garbage), activations and rotations.
//!
//! # Invariants
//!
//! - The engine NEVER panics on storage errors
//! - A tag is accepted at most once, however often it is replayed
//! - Memory never runs ahead of storage: after every call, the receiver's
//!   in-memory key sets equal what it persisted

#![no_main]

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tagwarden_core::{
    ChaoticStorage, Environment, MemoryStorage, ScheduledTask, Storage, TransportConfig,
    TransportKeyEngine,
};
use tagwarden_crypto::{HkdfTransportCrypto, SecretKey, TransportCrypto};
use tagwarden_proto::{ContactId, KeySetId, OwnerId, PROTOCOL_VERSION, TAG_LENGTH, TransportId};

/// Clock moved by the fuzzer; scheduled rotations are dropped and driven
/// explicitly instead.
#[derive(Clone)]
struct FuzzEnv {
    now_ms: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    fn wall_clock_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn schedule(&self, _delay: Duration, _task: ScheduledTask) {}

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x5A);
    }
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    root: [u8; 32],
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    /// Alice claims a stream and the tag is queued for delivery
    Send,
    /// Deliver a queued tag (index wraps)
    Deliver(u8),
    /// Deliver random bytes
    Garbage([u8; TAG_LENGTH]),
    /// Peek at a queued tag, then mark it
    PeekThenMark(u8),
    /// Activate a key set id on the receiver
    Activate(u8),
    /// Rebuild the receiver from its storage after moving the clock forward
    Restart { periods: u8 },
}

fuzz_target!(|scenario: Scenario| {
    let transport = TransportId::new("tcp").expect("non-empty");
    let config = TransportConfig::new(transport.clone(), Duration::from_secs(60));
    let period = config.rotation_period_millis();
    let env = FuzzEnv { now_ms: Arc::new(AtomicU64::new(10 * period)) };
    let crypto = HkdfTransportCrypto;
    let root = SecretKey::from_bytes(scenario.root);

    let sender_storage = MemoryStorage::new();
    sender_storage.add_transport(&transport, config.max_latency).expect("memory storage");
    let sender = TransportKeyEngine::new(&config, sender_storage, crypto, env.clone());
    sender.start().expect("memory storage");

    let backing = MemoryStorage::new();
    backing.add_transport(&transport, config.max_latency).expect("memory storage");
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let storage = ChaoticStorage::with_seed(backing.clone(), 0.0, scenario.chaos_seed);
    let mut receiver = TransportKeyEngine::new(&config, storage.clone(), crypto, env.clone());
    receiver.start().expect("no failures yet");

    let alice = OwnerId::Contact(ContactId(2));
    let bob = OwnerId::Contact(ContactId(1));
    let now = env.wall_clock_millis();
    sender.add_rotation_keys(alice, &root, now, true, true).expect("memory storage");
    receiver.add_rotation_keys(bob, &root, now, false, false).expect("no failures yet");
    storage.set_failure_rate(failure_rate);

    let mut queued: Vec<[u8; TAG_LENGTH]> = Vec::new();
    let mut accepted: HashSet<[u8; TAG_LENGTH]> = HashSet::new();

    for op in scenario.ops.into_iter().take(64) {
        match op {
            Op::Send => {
                if let Ok(Some(ctx)) = sender.get_outgoing_stream_context(alice) {
                    let tag = crypto.encode_tag(&ctx.tag_key, PROTOCOL_VERSION, ctx.stream_number);
                    queued.push(tag);
                }
            },
            Op::Deliver(i) => {
                let Some(tag) = pick(&queued, i) else { continue };
                if let Ok(Some(_)) = receiver.get_incoming_stream_context(&tag) {
                    assert!(accepted.insert(tag), "tag accepted twice");
                }
            },
            Op::Garbage(tag) => {
                if let Ok(Some(_)) = receiver.get_incoming_stream_context(&tag) {
                    assert!(accepted.insert(tag), "tag accepted twice");
                }
            },
            Op::PeekThenMark(i) => {
                let Some(tag) = pick(&queued, i) else { continue };
                if receiver.get_stream_context_only(&tag).is_none() {
                    continue;
                }
                if let Ok(true) = receiver.mark_tag_as_recognised(&tag) {
                    assert!(accepted.insert(tag), "tag accepted twice");
                }
            },
            Op::Activate(id) => {
                let _ = receiver.activate_keys(KeySetId(u32::from(id % 4)));
            },
            Op::Restart { periods } => {
                env.now_ms.fetch_add(u64::from(periods % 3) * period, Ordering::SeqCst);
                let restarted =
                    TransportKeyEngine::new(&config, storage.clone(), crypto, env.clone());
                if restarted.start().is_ok() {
                    receiver = restarted;
                }
            },
        }

        let mut persisted = backing.get_transport_keys(&transport).expect("memory storage");
        persisted.sort_by_key(|set| set.key_set_id);
        assert_eq!(receiver.snapshot(), persisted, "memory ran ahead of storage");
    }
});

fn pick(queued: &[[u8; TAG_LENGTH]], index: u8) -> Option<[u8; TAG_LENGTH]> {
    if queued.is_empty() {
        return None;
    }
    Some(queued[usize::from(index) % queued.len()])
}
