//! Key record model.
//!
//! Persisted key values ([`TransportKeys`]) are immutable snapshots. While a
//! key set is live the engine works on a mutable copy that owns real
//! [`ReorderingWindow`]s and a stream counter, and flattens it back with
//! `snapshot()` whenever the state has to be written out.

use serde::{Deserialize, Serialize};
use tagwarden_crypto::{HandshakeRoot, IncomingKeys, OutgoingKeys, SecretKey, TransportKeys};
use tagwarden_proto::{KeySetId, MAX_32_BIT_UNSIGNED, OwnerId, TransportId};

use crate::window::{ReorderingWindow, WindowError};

/// A persisted key set: keys plus the identifiers they are filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportKeySet {
    /// Identifier assigned by storage
    pub key_set_id: KeySetId,
    /// Contact or pending contact owning the keys
    pub owner: OwnerId,
    /// The keys themselves
    pub keys: TransportKeys,
}

/// Which of the three incoming periods a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncomingSlot {
    /// Period before the current one
    Previous,
    /// Current period
    Current,
    /// Period after the current one
    Next,
}

impl IncomingSlot {
    /// All slots, oldest first.
    pub const ALL: [Self; 3] = [Self::Previous, Self::Current, Self::Next];
}

/// Working copy of [`IncomingKeys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableIncomingKeys {
    tag_key: SecretKey,
    header_key: SecretKey,
    period: u64,
    window: ReorderingWindow,
}

impl MutableIncomingKeys {
    /// Key for computing recognition tags.
    pub fn tag_key(&self) -> &SecretKey {
        &self.tag_key
    }

    /// Key for decrypting stream headers.
    pub fn header_key(&self) -> &SecretKey {
        &self.header_key
    }

    /// Rotation period.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Anti-replay window.
    pub fn window(&self) -> &ReorderingWindow {
        &self.window
    }

    /// Replace the window with one that has already been persisted.
    pub fn set_window(&mut self, window: ReorderingWindow) {
        debug_assert_eq!(window.size(), self.window.size());
        self.window = window;
    }

    /// Flatten back to the persisted form.
    pub fn snapshot(&self) -> IncomingKeys {
        IncomingKeys {
            tag_key: self.tag_key.clone(),
            header_key: self.header_key.clone(),
            period: self.period,
            window_base: self.window.base(),
            window_bitmap: self.window.bitmap(),
        }
    }
}

impl TryFrom<IncomingKeys> for MutableIncomingKeys {
    type Error = WindowError;

    fn try_from(keys: IncomingKeys) -> Result<Self, Self::Error> {
        let window = ReorderingWindow::from_bitmap(keys.window_base, &keys.window_bitmap)?;
        Ok(Self { tag_key: keys.tag_key, header_key: keys.header_key, period: keys.period, window })
    }
}

/// Working copy of [`OutgoingKeys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableOutgoingKeys {
    tag_key: SecretKey,
    header_key: SecretKey,
    period: u64,
    stream_counter: u64,
    active: bool,
}

impl MutableOutgoingKeys {
    /// Key for computing recognition tags.
    pub fn tag_key(&self) -> &SecretKey {
        &self.tag_key
    }

    /// Key for encrypting stream headers.
    pub fn header_key(&self) -> &SecretKey {
        &self.header_key
    }

    /// Rotation period.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Next stream number to hand out.
    pub fn stream_counter(&self) -> u64 {
        self.stream_counter
    }

    /// Whether these keys may be used for sending.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the counter still fits in a tag.
    ///
    /// Once the counter passes 2^32 - 1 the key set can never send again
    /// until it is replaced.
    pub fn is_exhausted(&self) -> bool {
        self.stream_counter > MAX_32_BIT_UNSIGNED
    }

    /// Mark the keys usable for sending.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Consume one stream number.
    pub fn increment_stream_counter(&mut self) {
        self.stream_counter += 1;
    }

    /// Flatten back to the persisted form.
    pub fn snapshot(&self) -> OutgoingKeys {
        OutgoingKeys {
            tag_key: self.tag_key.clone(),
            header_key: self.header_key.clone(),
            period: self.period,
            stream_counter: self.stream_counter,
            active: self.active,
        }
    }
}

impl From<OutgoingKeys> for MutableOutgoingKeys {
    fn from(keys: OutgoingKeys) -> Self {
        Self {
            tag_key: keys.tag_key,
            header_key: keys.header_key,
            period: keys.period,
            stream_counter: keys.stream_counter,
            active: keys.active,
        }
    }
}

/// Working copy of [`TransportKeys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableTransportKeys {
    transport_id: TransportId,
    previous_incoming: MutableIncomingKeys,
    current_incoming: MutableIncomingKeys,
    next_incoming: MutableIncomingKeys,
    current_outgoing: MutableOutgoingKeys,
    handshake: Option<HandshakeRoot>,
}

impl MutableTransportKeys {
    /// Transport the keys are bound to.
    pub fn transport_id(&self) -> &TransportId {
        &self.transport_id
    }

    /// Incoming keys for one period.
    pub fn incoming(&self, slot: IncomingSlot) -> &MutableIncomingKeys {
        match slot {
            IncomingSlot::Previous => &self.previous_incoming,
            IncomingSlot::Current => &self.current_incoming,
            IncomingSlot::Next => &self.next_incoming,
        }
    }

    /// Mutable incoming keys for one period.
    pub fn incoming_mut(&mut self, slot: IncomingSlot) -> &mut MutableIncomingKeys {
        match slot {
            IncomingSlot::Previous => &mut self.previous_incoming,
            IncomingSlot::Current => &mut self.current_incoming,
            IncomingSlot::Next => &mut self.next_incoming,
        }
    }

    /// Outgoing keys for the current period.
    pub fn outgoing(&self) -> &MutableOutgoingKeys {
        &self.current_outgoing
    }

    /// Mutable outgoing keys for the current period.
    pub fn outgoing_mut(&mut self) -> &mut MutableOutgoingKeys {
        &mut self.current_outgoing
    }

    /// Rotation period of the key set.
    pub fn period(&self) -> u64 {
        self.current_outgoing.period
    }

    /// Whether the keys were derived in handshake mode.
    pub fn is_handshake_mode(&self) -> bool {
        self.handshake.is_some()
    }

    /// Flatten back to the persisted form.
    pub fn snapshot(&self) -> TransportKeys {
        TransportKeys {
            transport_id: self.transport_id.clone(),
            previous_incoming: self.previous_incoming.snapshot(),
            current_incoming: self.current_incoming.snapshot(),
            next_incoming: self.next_incoming.snapshot(),
            current_outgoing: self.current_outgoing.snapshot(),
            handshake: self.handshake.clone(),
        }
    }
}

impl TryFrom<TransportKeys> for MutableTransportKeys {
    type Error = WindowError;

    fn try_from(keys: TransportKeys) -> Result<Self, Self::Error> {
        debug_assert!(keys.periods_consistent());
        Ok(Self {
            transport_id: keys.transport_id,
            previous_incoming: keys.previous_incoming.try_into()?,
            current_incoming: keys.current_incoming.try_into()?,
            next_incoming: keys.next_incoming.try_into()?,
            current_outgoing: keys.current_outgoing.into(),
            handshake: keys.handshake,
        })
    }
}

/// A live key set: identifiers plus mutable keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableKeySet {
    key_set_id: KeySetId,
    owner: OwnerId,
    keys: MutableTransportKeys,
}

impl MutableKeySet {
    /// Bundle identifiers with working keys.
    pub fn new(key_set_id: KeySetId, owner: OwnerId, keys: MutableTransportKeys) -> Self {
        Self { key_set_id, owner, keys }
    }

    /// Storage identifier.
    pub fn key_set_id(&self) -> KeySetId {
        self.key_set_id
    }

    /// Owner of the keys.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Working keys.
    pub fn keys(&self) -> &MutableTransportKeys {
        &self.keys
    }

    /// Mutable working keys.
    pub fn keys_mut(&mut self) -> &mut MutableTransportKeys {
        &mut self.keys
    }

    /// Flatten back to the persisted form.
    pub fn snapshot(&self) -> TransportKeySet {
        TransportKeySet { key_set_id: self.key_set_id, owner: self.owner, keys: self.keys.snapshot() }
    }
}

impl TryFrom<TransportKeySet> for MutableKeySet {
    type Error = WindowError;

    fn try_from(set: TransportKeySet) -> Result<Self, Self::Error> {
        Ok(Self { key_set_id: set.key_set_id, owner: set.owner, keys: set.keys.try_into()? })
    }
}
