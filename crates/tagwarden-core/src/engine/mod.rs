//! Per-transport key engine.
//!
//! Owns every key set for one transport and answers the two questions the
//! transport layer asks: "which keys do I send to this contact with?" and
//! "whose stream starts with this tag?".
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────── TransportKeyEngine ────────────────────┐
//!            │  Mutex<EngineState>                                        │
//!            │    key_sets: KeySetId → MutableKeySet                      │
//!  tag ─────►│    tags:     Tag → (KeySetId, slot, stream number)         │
//!  owner ───►│    outgoing: OwnerId → KeySetId (highest active id)        │
//!            └───────┬───────────────────────────────────┬────────────────┘
//!                    │ persist first                     │ schedule
//!                    ▼                                   ▼
//!                 Storage                      Environment (next period)
//! ```
//!
//! Every per-use mutation (window slide, counter increment, activation) is
//! written to storage before it is applied in memory. A failed write leaves
//! the engine exactly as it was, so memory never runs ahead of storage.
//!
//! Rotation runs at each period boundary on the environment's executor. Only
//! the most recently scheduled rotation is live; an older one that fires
//! late does nothing.

#![allow(clippy::disallowed_types, reason = "Engine state is guarded by a synchronous lock")]

mod state;

use std::{
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use state::{EngineState, TagContext};
use tagwarden_crypto::{SecretKey, TransportCrypto, TransportKeys};
use tagwarden_proto::{ContactId, KeySetId, OwnerId, PendingContactId, TAG_LENGTH, TransportId};

use crate::{
    config::TransportConfig,
    context::StreamContext,
    env::Environment,
    error::KeyError,
    keys::{MutableKeySet, TransportKeySet},
    storage::Storage,
};

/// Key engine for a single transport.
///
/// Cheap to clone; clones share the same state. All operations take the
/// engine's lock for their full duration, including the storage calls they
/// make.
pub struct TransportKeyEngine<S, C, E>
where
    S: Storage,
    C: TransportCrypto,
    E: Environment,
{
    inner: Arc<EngineInner<S, C, E>>,
}

impl<S, C, E> Clone for TransportKeyEngine<S, C, E>
where
    S: Storage,
    C: TransportCrypto,
    E: Environment,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct EngineInner<S, C, E> {
    transport_id: TransportId,
    period_length_ms: u64,
    storage: S,
    crypto: C,
    env: E,
    state: Mutex<EngineState>,
    /// Bumped on every schedule; a firing rotation whose generation is stale
    /// was cancelled
    rotation_generation: AtomicU64,
}

impl<S, C, E> TransportKeyEngine<S, C, E>
where
    S: Storage,
    C: TransportCrypto,
    E: Environment,
{
    /// Create an engine for `config.id`. Nothing is loaded until
    /// [`start`](Self::start).
    pub fn new(config: &TransportConfig, storage: S, crypto: C, env: E) -> Self {
        let period_length_ms = config.rotation_period_millis();
        debug_assert!(period_length_ms > 0);

        Self {
            inner: Arc::new(EngineInner {
                transport_id: config.id.clone(),
                period_length_ms,
                storage,
                crypto,
                env,
                state: Mutex::new(EngineState::default()),
                rotation_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Transport this engine manages.
    pub fn transport_id(&self) -> &TransportId {
        &self.inner.transport_id
    }

    /// Length of one rotation period in milliseconds.
    pub fn period_length_ms(&self) -> u64 {
        self.inner.period_length_ms
    }

    /// Load persisted key sets, bring them up to the current period, and
    /// schedule the next rotation.
    ///
    /// Key sets whose period advanced are written back before anything is
    /// published.
    ///
    /// # Errors
    ///
    /// - `KeyError::AlreadyStarted` on a second call
    /// - `KeyError::Storage` if loading or writing back fails; the engine
    ///   stays unstarted and may be started again
    pub fn start(&self) -> Result<(), KeyError> {
        let inner = &self.inner;
        let now = inner.env.wall_clock_millis();
        let period = inner.period_at(now);

        {
            let mut state = inner.lock();
            if state.started {
                return Err(KeyError::AlreadyStarted { transport: inner.transport_id.clone() });
            }

            let loaded = inner.storage.get_transport_keys(&inner.transport_id)?;
            let (sets, changed) = inner.update_key_sets(loaded, period)?;
            if !changed.is_empty() {
                inner.storage.update_transport_keys(&changed)?;
            }

            let loaded_count = sets.len();
            state.replace_all(&inner.crypto, sets);
            state.started = true;

            tracing::info!(
                transport = %inner.transport_id,
                key_sets = loaded_count,
                rotated = changed.len(),
                period,
                "Key engine started"
            );
        }

        inner.schedule_rotation(now);
        Ok(())
    }

    /// Derive rotation-mode keys for an owner from a shared root key.
    ///
    /// Keys are derived for the period containing `timestamp_ms` and then
    /// rotated to the current period, so a stale timestamp still yields
    /// keys for now. Returns the id storage assigned to the new key set.
    ///
    /// # Errors
    ///
    /// - `KeyError::Crypto` if `timestamp_ms` falls in period zero
    /// - `KeyError::Storage` if the key set cannot be stored; nothing is
    ///   published
    pub fn add_rotation_keys(
        &self,
        owner: OwnerId,
        root_key: &SecretKey,
        timestamp_ms: u64,
        alice: bool,
        active: bool,
    ) -> Result<KeySetId, KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let derived = inner.crypto.derive_rotation_keys(
            &inner.transport_id,
            root_key,
            inner.period_at(timestamp_ms),
            alice,
            active,
        )?;
        let keys = inner.crypto.update_transport_keys(&derived, inner.current_period())?;

        inner.store_and_publish(&mut state, owner, keys)
    }

    /// Derive handshake-mode keys for the current period.
    ///
    /// The outgoing keys are active immediately.
    ///
    /// # Errors
    ///
    /// - `KeyError::Storage` if the key set cannot be stored; nothing is
    ///   published
    pub fn add_handshake_keys(
        &self,
        owner: OwnerId,
        root_key: &SecretKey,
        alice: bool,
    ) -> Result<KeySetId, KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let keys = inner.crypto.derive_handshake_keys(
            &inner.transport_id,
            root_key,
            inner.current_period(),
            alice,
        )?;

        inner.store_and_publish(&mut state, owner, keys)
    }

    /// Allow a key set's outgoing keys to be used for sending.
    ///
    /// # Errors
    ///
    /// - `KeyError::UnknownKeySet` if the engine does not hold `key_set_id`
    /// - `KeyError::Storage` if the flag cannot be persisted
    pub fn activate_keys(&self, key_set_id: KeySetId) -> Result<(), KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let set = state.key_set(key_set_id).ok_or_else(|| inner.unknown(key_set_id))?;
        if set.keys().outgoing().is_active() {
            return Ok(());
        }

        inner.storage.set_transport_keys_active(&inner.transport_id, key_set_id)?;
        state.activate(key_set_id);

        tracing::debug!(
            transport = %inner.transport_id,
            key_set_id = %key_set_id,
            "Activated outgoing keys"
        );
        Ok(())
    }

    /// Whether a stream can be sent to `owner` right now.
    pub fn can_send_outgoing_streams(&self, owner: OwnerId) -> bool {
        let state = self.inner.lock();
        state.outgoing(owner).is_some_and(|set| !set.keys().outgoing().is_exhausted())
    }

    /// Claim the next stream number for `owner`.
    ///
    /// Returns `None` if the owner has no active outgoing keys or their
    /// stream counter is used up.
    ///
    /// # Errors
    ///
    /// - `KeyError::Storage` if the counter cannot be persisted; the stream
    ///   number is not consumed
    pub fn get_outgoing_stream_context(
        &self,
        owner: OwnerId,
    ) -> Result<Option<StreamContext>, KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let Some(set) = state.outgoing(owner) else {
            return Ok(None);
        };
        let outgoing = set.keys().outgoing();
        let Ok(stream_number) = u32::try_from(outgoing.stream_counter()) else {
            return Ok(None);
        };

        let key_set_id = set.key_set_id();
        let context = StreamContext {
            owner,
            transport_id: inner.transport_id.clone(),
            tag_key: outgoing.tag_key().clone(),
            header_key: outgoing.header_key().clone(),
            stream_number,
            handshake_mode: set.keys().is_handshake_mode(),
        };

        inner.storage.increment_stream_counter(&inner.transport_id, key_set_id)?;
        state.increment_stream_counter(key_set_id);

        Ok(Some(context))
    }

    /// Recognise and consume an incoming tag.
    ///
    /// A tag can be used once. On a hit the reordering window slides, the
    /// tag index is patched, and the key set's outgoing keys are activated
    /// if they were not already.
    ///
    /// # Errors
    ///
    /// - `KeyError::Storage` if the window or activation cannot be persisted
    pub fn get_incoming_stream_context(
        &self,
        tag: &[u8; TAG_LENGTH],
    ) -> Result<Option<StreamContext>, KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let Some(tag_context) = state.tag(tag) else {
            return Ok(None);
        };
        let context = inner.incoming_context(&state, tag_context)?;
        inner.consume(&mut state, tag_context)?;

        Ok(Some(context))
    }

    /// Look up an incoming tag without consuming it.
    pub fn get_stream_context_only(&self, tag: &[u8; TAG_LENGTH]) -> Option<StreamContext> {
        let inner = &self.inner;
        let state = inner.lock();

        let tag_context = state.tag(tag)?;
        inner.incoming_context(&state, tag_context).ok()
    }

    /// Consume a tag previously looked up with
    /// [`get_stream_context_only`](Self::get_stream_context_only).
    ///
    /// Returns false if the tag is not (or no longer) recognised.
    ///
    /// # Errors
    ///
    /// - `KeyError::Storage` if the window or activation cannot be persisted
    pub fn mark_tag_as_recognised(&self, tag: &[u8; TAG_LENGTH]) -> Result<bool, KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let Some(tag_context) = state.tag(tag) else {
            return Ok(false);
        };
        inner.consume(&mut state, tag_context)?;
        Ok(true)
    }

    /// Forget every key set of `owner`.
    ///
    /// In-memory only: deleting the persisted key sets is up to whoever
    /// removed the owner.
    pub fn remove_owner(&self, owner: OwnerId) {
        let removed = self.inner.lock().remove_owner(owner);
        if !removed.is_empty() {
            tracing::debug!(
                transport = %self.inner.transport_id,
                owner = %owner,
                key_sets = removed.len(),
                "Removed owner keys"
            );
        }
    }

    /// Forget every key set of a contact.
    pub fn remove_contact(&self, contact: ContactId) {
        self.remove_owner(OwnerId::Contact(contact));
    }

    /// Forget every key set of a pending contact.
    pub fn remove_pending_contact(&self, pending: PendingContactId) {
        self.remove_owner(OwnerId::PendingContact(pending));
    }

    /// Delete a key set from storage and memory.
    ///
    /// Used to undo an add whose sibling adds on other transports failed.
    /// The key set is dropped from memory even if the storage delete fails.
    ///
    /// # Errors
    ///
    /// - `KeyError::UnknownKeySet` if the engine does not hold `key_set_id`
    /// - `KeyError::Storage` if the persisted key set cannot be deleted
    pub fn discard_key_set(&self, key_set_id: KeySetId) -> Result<(), KeyError> {
        let inner = &self.inner;
        let mut state = inner.lock();

        if state.key_set(key_set_id).is_none() {
            return Err(inner.unknown(key_set_id));
        }
        let deleted = inner.storage.remove_transport_keys(&inner.transport_id, key_set_id);
        state.remove_key_set(key_set_id);

        tracing::debug!(
            transport = %inner.transport_id,
            key_set_id = %key_set_id,
            "Discarded key set"
        );
        deleted.map_err(KeyError::from)
    }

    /// Number of key sets held in memory.
    pub fn key_set_count(&self) -> usize {
        self.inner.lock().key_set_count()
    }

    /// Number of recognition tags currently accepted.
    pub fn tag_count(&self) -> usize {
        self.inner.lock().tag_count()
    }

    /// Key set chosen for sending to `owner`, if any.
    pub fn outgoing_key_set(&self, owner: OwnerId) -> Option<KeySetId> {
        self.inner.lock().outgoing(owner).map(MutableKeySet::key_set_id)
    }

    /// Persisted form of every key set held in memory.
    pub fn snapshot(&self) -> Vec<TransportKeySet> {
        self.inner.lock().snapshot()
    }
}

impl<S, C, E> EngineInner<S, C, E>
where
    S: Storage,
    C: TransportCrypto,
    E: Environment,
{
    /// # Panics
    ///
    /// Panics if the mutex is poisoned (a thread panicked while holding it).
    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine mutex poisoned")
    }

    fn period_at(&self, timestamp_ms: u64) -> u64 {
        timestamp_ms / self.period_length_ms
    }

    fn current_period(&self) -> u64 {
        self.period_at(self.env.wall_clock_millis())
    }

    fn unknown(&self, key_set_id: KeySetId) -> KeyError {
        KeyError::UnknownKeySet { transport: self.transport_id.clone(), key_set_id }
    }

    /// Bring `sets` up to `period`.
    ///
    /// Returns the working copies of all sets and the persisted form of
    /// those whose period advanced.
    fn update_key_sets(
        &self,
        sets: Vec<TransportKeySet>,
        period: u64,
    ) -> Result<(Vec<MutableKeySet>, Vec<TransportKeySet>), KeyError> {
        let mut working = Vec::with_capacity(sets.len());
        let mut changed = Vec::new();

        for set in sets {
            let updated = self.crypto.update_transport_keys(&set.keys, period)?;
            let updated =
                TransportKeySet { key_set_id: set.key_set_id, owner: set.owner, keys: updated };
            if updated.keys.period() > set.keys.period() {
                changed.push(updated.clone());
            }
            working.push(MutableKeySet::try_from(updated)?);
        }

        Ok((working, changed))
    }

    fn store_and_publish(
        &self,
        state: &mut EngineState,
        owner: OwnerId,
        keys: TransportKeys,
    ) -> Result<KeySetId, KeyError> {
        let period = keys.period();
        let handshake_mode = keys.is_handshake_mode();
        let working = keys.clone().try_into()?;

        let key_set_id = self.storage.add_transport_keys(owner, &keys)?;
        state.publish(&self.crypto, MutableKeySet::new(key_set_id, owner, working));

        tracing::debug!(
            transport = %self.transport_id,
            key_set_id = %key_set_id,
            owner = %owner,
            period,
            handshake_mode,
            "Added key set"
        );
        Ok(key_set_id)
    }

    fn incoming_context(
        &self,
        state: &EngineState,
        tag: TagContext,
    ) -> Result<StreamContext, KeyError> {
        let set = state.key_set(tag.key_set_id).ok_or_else(|| self.unknown(tag.key_set_id))?;
        let incoming = set.keys().incoming(tag.slot);

        Ok(StreamContext {
            owner: set.owner(),
            transport_id: self.transport_id.clone(),
            tag_key: incoming.tag_key().clone(),
            header_key: incoming.header_key().clone(),
            stream_number: tag.stream_number,
            handshake_mode: set.keys().is_handshake_mode(),
        })
    }

    /// Slide the window past a recognised tag and activate the outgoing keys
    /// on first use. Each step is persisted before it is applied.
    fn consume(&self, state: &mut EngineState, tag: TagContext) -> Result<(), KeyError> {
        let set = state.key_set(tag.key_set_id).ok_or_else(|| self.unknown(tag.key_set_id))?;
        let incoming = set.keys().incoming(tag.slot);
        let period = incoming.period();
        let needs_activation = !set.keys().outgoing().is_active();

        let mut window = incoming.window().clone();
        let change = window.advance(u64::from(tag.stream_number))?;

        self.storage.set_reordering_window(
            tag.key_set_id,
            &self.transport_id,
            period,
            window.base(),
            &window.bitmap(),
        )?;
        state.commit_window(&self.crypto, tag, window, &change);

        if needs_activation {
            self.storage.set_transport_keys_active(&self.transport_id, tag.key_set_id)?;
            state.activate(tag.key_set_id);

            tracing::info!(
                transport = %self.transport_id,
                key_set_id = %tag.key_set_id,
                "Outgoing keys activated by incoming stream"
            );
        }

        Ok(())
    }

    /// Rotate every key set to the current period and rebuild the indexes.
    ///
    /// Nothing in memory changes unless the rotated key sets were persisted.
    fn rotate_keys(&self) -> Result<(), KeyError> {
        let period = self.current_period();
        let mut state = self.lock();

        let (sets, changed) = self.update_key_sets(state.snapshot(), period)?;
        if !changed.is_empty() {
            self.storage.update_transport_keys(&changed)?;
        }
        state.replace_all(&self.crypto, sets);

        tracing::info!(
            transport = %self.transport_id,
            period,
            rotated = changed.len(),
            key_sets = state.key_set_count(),
            tags = state.tag_count(),
            "Rotated transport keys"
        );
        Ok(())
    }

    /// Schedule a rotation for the next period boundary after `now_ms`,
    /// cancelling any rotation scheduled earlier.
    fn schedule_rotation(self: &Arc<Self>, now_ms: u64) {
        let delay = Duration::from_millis(self.period_length_ms - now_ms % self.period_length_ms);
        let generation = self.rotation_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let engine: Weak<Self> = Arc::downgrade(self);

        self.env.schedule(
            delay,
            Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.run_scheduled_rotation(generation);
                }
            }),
        );
    }

    fn run_scheduled_rotation(self: &Arc<Self>, generation: u64) {
        if self.rotation_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        if let Err(e) = self.rotate_keys() {
            tracing::warn!(
                transport = %self.transport_id,
                error = %e,
                "Scheduled key rotation failed"
            );
        }

        self.schedule_rotation(self.env.wall_clock_millis());
    }
}
