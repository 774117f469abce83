//! Persisted transport key values.
//!
//! These are plain values: what storage reads and writes, and what key
//! derivation returns. The mutable working copies used while a key set is
//! live (reordering windows, counters) belong to the key engine.
//!
//! # Invariants
//!
//! For a key set whose outgoing keys are for period `P`:
//! - `previous_incoming.period == P - 1`
//! - `current_incoming.period == P`
//! - `next_incoming.period == P + 1`

use serde::{Deserialize, Serialize};
use tagwarden_proto::{REORDERING_WINDOW_SIZE, TransportId};

use crate::secret::SecretKey;

/// Keys for recognising and decrypting incoming streams in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingKeys {
    /// Key for computing recognition tags
    pub tag_key: SecretKey,
    /// Key for decrypting stream headers
    pub header_key: SecretKey,
    /// Rotation period these keys belong to
    pub period: u64,
    /// Lowest stream number not yet known to be seen
    pub window_base: u64,
    /// Seen bitmap, MSB-first, `REORDERING_WINDOW_SIZE / 8` bytes
    pub window_bitmap: Vec<u8>,
}

impl IncomingKeys {
    /// Fresh incoming keys with an empty reordering window.
    pub fn new(tag_key: SecretKey, header_key: SecretKey, period: u64) -> Self {
        Self {
            tag_key,
            header_key,
            period,
            window_base: 0,
            window_bitmap: vec![0; REORDERING_WINDOW_SIZE / 8],
        }
    }
}

/// Keys for tagging and encrypting outgoing streams in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingKeys {
    /// Key for computing recognition tags
    pub tag_key: SecretKey,
    /// Key for encrypting stream headers
    pub header_key: SecretKey,
    /// Rotation period these keys belong to
    pub period: u64,
    /// Next stream number to hand out
    pub stream_counter: u64,
    /// Whether these keys may be used for sending
    pub active: bool,
}

impl OutgoingKeys {
    /// Fresh outgoing keys with the stream counter at zero.
    pub fn new(tag_key: SecretKey, header_key: SecretKey, period: u64, active: bool) -> Self {
        Self { tag_key, header_key, period, stream_counter: 0, active }
    }
}

/// Root material retained by handshake-mode key sets.
///
/// Handshake keys are re-derived from the root for every period, so the root
/// must be kept for as long as the key set lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRoot {
    /// Handshake root key
    pub root_key: SecretKey,
    /// Whether the local peer plays the Alice role
    pub alice: bool,
}

/// All keys for one owner on one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportKeys {
    /// Transport these keys are bound to
    pub transport_id: TransportId,
    /// Incoming keys for the previous period
    pub previous_incoming: IncomingKeys,
    /// Incoming keys for the current period
    pub current_incoming: IncomingKeys,
    /// Incoming keys for the next period
    pub next_incoming: IncomingKeys,
    /// Outgoing keys for the current period
    pub current_outgoing: OutgoingKeys,
    /// Present for handshake-mode key sets
    pub handshake: Option<HandshakeRoot>,
}

impl TransportKeys {
    /// Rotation period of the key set (the outgoing period).
    pub fn period(&self) -> u64 {
        self.current_outgoing.period
    }

    /// Whether these keys were derived in handshake mode.
    pub fn is_handshake_mode(&self) -> bool {
        self.handshake.is_some()
    }

    /// Whether the incoming periods line up around the outgoing period.
    pub fn periods_consistent(&self) -> bool {
        let period = self.period();
        self.current_incoming.period == period
            && self.previous_incoming.period.checked_add(1) == Some(period)
            && period.checked_add(1) == Some(self.next_incoming.period)
    }
}
