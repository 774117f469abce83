//! In-memory indexes of a key engine.
//!
//! Pure state: every method here runs under the engine's lock and never
//! touches storage. The engine persists first and calls in here only once the
//! write has succeeded.

use std::collections::{BTreeMap, HashMap};

use tagwarden_crypto::TransportCrypto;
use tagwarden_proto::{KeySetId, OwnerId, PROTOCOL_VERSION, TAG_LENGTH};

use crate::{
    keys::{IncomingSlot, MutableKeySet, TransportKeySet},
    window::{ReorderingWindow, WindowChange},
};

/// A recognition tag.
pub(super) type Tag = [u8; TAG_LENGTH];

/// What a recognition tag points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TagContext {
    pub key_set_id: KeySetId,
    pub slot: IncomingSlot,
    pub stream_number: u32,
}

/// Key sets plus the two indexes derived from them.
///
/// # Invariants
///
/// - Every tag in `tags` belongs to a key set in `key_sets`, and names an
///   unseen stream number inside that slot's window
/// - `outgoing[owner]` is the highest id among the owner's key sets with
///   active outgoing keys; owners without one have no entry
#[derive(Debug, Default)]
pub(super) struct EngineState {
    pub started: bool,
    key_sets: BTreeMap<KeySetId, MutableKeySet>,
    tags: HashMap<Tag, TagContext>,
    outgoing: HashMap<OwnerId, KeySetId>,
}

impl EngineState {
    pub fn key_set(&self, key_set_id: KeySetId) -> Option<&MutableKeySet> {
        self.key_sets.get(&key_set_id)
    }

    pub fn tag(&self, tag: &Tag) -> Option<TagContext> {
        self.tags.get(tag).copied()
    }

    /// Key set currently chosen for sending to `owner`.
    pub fn outgoing(&self, owner: OwnerId) -> Option<&MutableKeySet> {
        self.outgoing.get(&owner).and_then(|id| self.key_sets.get(id))
    }

    pub fn key_set_count(&self) -> usize {
        self.key_sets.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Persisted form of every key set.
    pub fn snapshot(&self) -> Vec<TransportKeySet> {
        self.key_sets.values().map(MutableKeySet::snapshot).collect()
    }

    /// Add a key set and index its tags.
    pub fn publish<C: TransportCrypto>(&mut self, crypto: &C, set: MutableKeySet) {
        let key_set_id = set.key_set_id();
        let owner = set.owner();

        for slot in IncomingSlot::ALL {
            let unseen = set.keys().incoming(slot).window().unseen();
            index_tags(&mut self.tags, crypto, &set, slot, unseen);
        }
        self.key_sets.insert(key_set_id, set);
        self.select_outgoing(owner);

        tracing::debug!(
            key_set_id = %key_set_id,
            owner = %owner,
            tags = self.tags.len(),
            "Published key set"
        );
    }

    /// Drop everything and publish `sets` from scratch.
    pub fn replace_all<C: TransportCrypto>(
        &mut self,
        crypto: &C,
        sets: impl IntoIterator<Item = MutableKeySet>,
    ) {
        self.key_sets.clear();
        self.tags.clear();
        self.outgoing.clear();
        for set in sets {
            self.publish(crypto, set);
        }
    }

    /// Install a window that has already been persisted and patch the tag
    /// index to match.
    pub fn commit_window<C: TransportCrypto>(
        &mut self,
        crypto: &C,
        tag: TagContext,
        window: ReorderingWindow,
        change: &WindowChange,
    ) {
        debug_assert!(self.key_sets.contains_key(&tag.key_set_id));
        let Some(set) = self.key_sets.get_mut(&tag.key_set_id) else {
            return;
        };
        set.keys_mut().incoming_mut(tag.slot).set_window(window);

        let set = &*set;
        unindex_tags(&mut self.tags, crypto, set, tag.slot, change.removed.iter().copied());
        index_tags(&mut self.tags, crypto, set, tag.slot, change.added.iter().copied());
    }

    /// Mark outgoing keys active. Returns false for an unknown key set.
    pub fn activate(&mut self, key_set_id: KeySetId) -> bool {
        let Some(set) = self.key_sets.get_mut(&key_set_id) else {
            return false;
        };
        set.keys_mut().outgoing_mut().activate();
        let owner = set.owner();
        self.select_outgoing(owner);
        true
    }

    pub fn increment_stream_counter(&mut self, key_set_id: KeySetId) {
        if let Some(set) = self.key_sets.get_mut(&key_set_id) {
            set.keys_mut().outgoing_mut().increment_stream_counter();
        }
    }

    /// Forget every key set, tag and outgoing choice of `owner`.
    ///
    /// Returns the ids of the removed key sets.
    pub fn remove_owner(&mut self, owner: OwnerId) -> Vec<KeySetId> {
        let removed: Vec<KeySetId> = self
            .key_sets
            .values()
            .filter(|set| set.owner() == owner)
            .map(MutableKeySet::key_set_id)
            .collect();

        for id in &removed {
            self.key_sets.remove(id);
        }
        self.tags.retain(|_, ctx| !removed.contains(&ctx.key_set_id));
        self.outgoing.remove(&owner);

        removed
    }

    /// Forget one key set and its tags. Returns false for an unknown key set.
    pub fn remove_key_set(&mut self, key_set_id: KeySetId) -> bool {
        let Some(set) = self.key_sets.remove(&key_set_id) else {
            return false;
        };
        self.tags.retain(|_, ctx| ctx.key_set_id != key_set_id);
        self.select_outgoing(set.owner());
        true
    }

    fn select_outgoing(&mut self, owner: OwnerId) {
        let chosen = self
            .key_sets
            .values()
            .filter(|set| set.owner() == owner && set.keys().outgoing().is_active())
            .map(MutableKeySet::key_set_id)
            .max();

        match chosen {
            Some(id) => {
                self.outgoing.insert(owner, id);
            },
            None => {
                self.outgoing.remove(&owner);
            },
        }
    }
}

fn index_tags<C: TransportCrypto>(
    tags: &mut HashMap<Tag, TagContext>,
    crypto: &C,
    set: &MutableKeySet,
    slot: IncomingSlot,
    stream_numbers: impl IntoIterator<Item = u64>,
) {
    let tag_key = set.keys().incoming(slot).tag_key();
    for number in stream_numbers {
        // Windows near the top of the number space reach past what a tag can encode
        let Ok(stream_number) = u32::try_from(number) else {
            continue;
        };
        let tag = crypto.encode_tag(tag_key, PROTOCOL_VERSION, stream_number);
        let ctx = TagContext { key_set_id: set.key_set_id(), slot, stream_number };
        if let Some(previous) = tags.insert(tag, ctx) {
            tracing::warn!(
                key_set_id = %ctx.key_set_id,
                displaced = %previous.key_set_id,
                stream_number,
                "Duplicate recognition tag"
            );
        }
    }
}

fn unindex_tags<C: TransportCrypto>(
    tags: &mut HashMap<Tag, TagContext>,
    crypto: &C,
    set: &MutableKeySet,
    slot: IncomingSlot,
    stream_numbers: impl IntoIterator<Item = u64>,
) {
    let tag_key = set.keys().incoming(slot).tag_key();
    for number in stream_numbers {
        let Ok(stream_number) = u32::try_from(number) else {
            continue;
        };
        let tag = crypto.encode_tag(tag_key, PROTOCOL_VERSION, stream_number);
        // A colliding key set may own the entry now
        let owned = tags
            .get(&tag)
            .is_some_and(|ctx| ctx.key_set_id == set.key_set_id() && ctx.slot == slot);
        if owned {
            tags.remove(&tag);
        }
    }
}
