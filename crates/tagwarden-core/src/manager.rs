//! Key manager: one key engine per transport behind a single facade.
//!
//! Per-owner calls fan out across every transport; per-transport calls are
//! routed to the matching engine. A transport without an engine (not
//! configured, or the manager not started yet) answers "not found" rather
//! than failing.

use std::{
    collections::HashMap,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use tagwarden_crypto::{KeyPair, PublicKey, SecretKey, TransportCrypto};
use tagwarden_proto::{ContactId, KeySetId, OwnerId, PendingContactId, TAG_LENGTH, TransportId};

use crate::{
    config::KeyManagerConfig,
    context::StreamContext,
    engine::TransportKeyEngine,
    env::Environment,
    error::{KeyError, KeyManagerError},
    storage::Storage,
};

/// Notifications from the rest of the system that affect key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyManagerEvent {
    /// A contact was deleted
    ContactRemoved(ContactId),
    /// A pending contact was deleted or promoted
    PendingContactRemoved(PendingContactId),
}

/// Facade over the per-transport key engines.
pub struct KeyManager<S, C, E>
where
    S: Storage,
    C: TransportCrypto,
    E: Environment,
{
    storage: S,
    crypto: C,
    env: E,
    config: KeyManagerConfig,
    started: AtomicBool,
    engines: OnceLock<HashMap<TransportId, TransportKeyEngine<S, C, E>>>,
}

impl<S, C, E> KeyManager<S, C, E>
where
    S: Storage,
    C: TransportCrypto,
    E: Environment,
{
    /// Create a stopped key manager.
    pub fn new(storage: S, crypto: C, env: E, config: KeyManagerConfig) -> Self {
        Self {
            storage,
            crypto,
            env,
            config,
            started: AtomicBool::new(false),
            engines: OnceLock::new(),
        }
    }

    /// Register configured transports and start one engine for each.
    ///
    /// # Errors
    ///
    /// - `KeyManagerError::AlreadyStarted` if the service already started
    /// - `KeyManagerError::Storage` / `KeyManagerError::Key` if a transport
    ///   cannot be registered or its engine cannot load its keys. No engine
    ///   is published and the call may be retried.
    pub fn start_service(&self) -> Result<(), KeyManagerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(KeyManagerError::AlreadyStarted);
        }

        match self.start_engines() {
            Ok(engines) => {
                let count = engines.len();
                if self.engines.set(engines).is_err() {
                    return Err(KeyManagerError::AlreadyStarted);
                }
                tracing::info!(transports = count, "Key manager started");
                Ok(())
            },
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "Key manager failed to start");
                Err(e)
            },
        }
    }

    fn start_engines(
        &self,
    ) -> Result<HashMap<TransportId, TransportKeyEngine<S, C, E>>, KeyManagerError> {
        let mut engines = HashMap::with_capacity(self.config.transports.len());

        for transport in &self.config.transports {
            if !self.storage.contains_transport(&transport.id)? {
                self.storage.add_transport(&transport.id, transport.max_latency)?;
                tracing::debug!(transport = %transport.id, "Registered transport");
            }

            let engine = TransportKeyEngine::new(
                transport,
                self.storage.clone(),
                self.crypto.clone(),
                self.env.clone(),
            );
            engine.start()?;
            engines.insert(transport.id.clone(), engine);
        }

        Ok(engines)
    }

    /// Whether [`start_service`](Self::start_service) has completed.
    pub fn is_started(&self) -> bool {
        self.engines.get().is_some()
    }

    /// Engine for `transport`, if the manager is started and the transport
    /// configured.
    pub fn engine(&self, transport: &TransportId) -> Option<&TransportKeyEngine<S, C, E>> {
        self.engines.get()?.get(transport)
    }

    fn all_engines(&self) -> impl Iterator<Item = &TransportKeyEngine<S, C, E>> {
        self.engines.get().into_iter().flat_map(HashMap::values)
    }

    /// Add rotation-mode keys for `owner` on one transport.
    ///
    /// Returns `None` if the transport has no engine.
    pub fn add_rotation_keys(
        &self,
        owner: OwnerId,
        transport: &TransportId,
        root_key: &SecretKey,
        timestamp_ms: u64,
        alice: bool,
        active: bool,
    ) -> Result<Option<KeySetId>, KeyManagerError> {
        let Some(engine) = self.engine(transport) else {
            return Ok(None);
        };
        let id = engine.add_rotation_keys(owner, root_key, timestamp_ms, alice, active)?;
        Ok(Some(id))
    }

    /// Add rotation-mode keys for `owner` on every transport.
    ///
    /// All or nothing: if any transport fails, the key sets already added
    /// on the others are discarded before the error is returned.
    pub fn add_rotation_keys_all(
        &self,
        owner: OwnerId,
        root_key: &SecretKey,
        timestamp_ms: u64,
        alice: bool,
        active: bool,
    ) -> Result<HashMap<TransportId, KeySetId>, KeyManagerError> {
        self.add_on_every_engine(|engine| {
            engine.add_rotation_keys(owner, root_key, timestamp_ms, alice, active)
        })
    }

    /// Add handshake-mode keys for `owner` on every transport.
    ///
    /// All or nothing, like [`add_rotation_keys_all`](Self::add_rotation_keys_all).
    pub fn add_handshake_keys(
        &self,
        owner: OwnerId,
        root_key: &SecretKey,
        alice: bool,
    ) -> Result<HashMap<TransportId, KeySetId>, KeyManagerError> {
        self.add_on_every_engine(|engine| engine.add_handshake_keys(owner, root_key, alice))
    }

    fn add_on_every_engine<F>(
        &self,
        add: F,
    ) -> Result<HashMap<TransportId, KeySetId>, KeyManagerError>
    where
        F: Fn(&TransportKeyEngine<S, C, E>) -> Result<KeySetId, KeyError>,
    {
        let mut added: Vec<(&TransportKeyEngine<S, C, E>, KeySetId)> = Vec::new();

        for engine in self.all_engines() {
            match add(engine) {
                Ok(id) => added.push((engine, id)),
                Err(e) => {
                    for (engine, id) in added {
                        if let Err(undo) = engine.discard_key_set(id) {
                            tracing::warn!(
                                transport = %engine.transport_id(),
                                key_set_id = %id,
                                error = %undo,
                                "Failed to discard key set after partial add"
                            );
                        }
                    }
                    return Err(e.into());
                },
            }
        }

        Ok(added.into_iter().map(|(engine, id)| (engine.transport_id().clone(), id)).collect())
    }

    /// Derive handshake keys for a contact from static key agreement.
    ///
    /// # Errors
    ///
    /// - `KeyManagerError::Crypto` if `their_public` is a low-order point
    pub fn add_contact(
        &self,
        contact: ContactId,
        their_public: &PublicKey,
        our_key_pair: &KeyPair,
    ) -> Result<HashMap<TransportId, KeySetId>, KeyManagerError> {
        self.add_agreed_keys(OwnerId::Contact(contact), their_public, our_key_pair)
    }

    /// Derive handshake keys for a pending contact from static key agreement.
    ///
    /// # Errors
    ///
    /// - `KeyManagerError::Crypto` if `their_public` is a low-order point
    pub fn add_pending_contact(
        &self,
        pending: PendingContactId,
        their_public: &PublicKey,
        our_key_pair: &KeyPair,
    ) -> Result<HashMap<TransportId, KeySetId>, KeyManagerError> {
        self.add_agreed_keys(OwnerId::PendingContact(pending), their_public, our_key_pair)
    }

    fn add_agreed_keys(
        &self,
        owner: OwnerId,
        their_public: &PublicKey,
        our_key_pair: &KeyPair,
    ) -> Result<HashMap<TransportId, KeySetId>, KeyManagerError> {
        let master = self.crypto.derive_static_master_key(their_public, our_key_pair)?;
        let pending = matches!(owner, OwnerId::PendingContact(_));
        let root = self.crypto.derive_handshake_root_key(&master, pending);
        let alice = self.crypto.is_alice(their_public, our_key_pair);

        self.add_handshake_keys(owner, &root, alice)
    }

    /// Activate the key sets returned by an earlier `add_*` call.
    ///
    /// Transports without an engine are skipped.
    ///
    /// # Errors
    ///
    /// - `KeyManagerError::Key` if an engine does not hold the named key set
    pub fn activate_keys(
        &self,
        key_sets: &HashMap<TransportId, KeySetId>,
    ) -> Result<(), KeyManagerError> {
        for (transport, key_set_id) in key_sets {
            match self.engine(transport) {
                Some(engine) => engine.activate_keys(*key_set_id)?,
                None => tracing::warn!(
                    transport = %transport,
                    key_set_id = %key_set_id,
                    "No engine for transport, not activating keys"
                ),
            }
        }
        Ok(())
    }

    /// Whether a stream can be sent to `owner` over `transport`.
    pub fn can_send_outgoing_streams(&self, owner: OwnerId, transport: &TransportId) -> bool {
        self.engine(transport).is_some_and(|engine| engine.can_send_outgoing_streams(owner))
    }

    /// Claim keys and a stream number for sending to `owner`.
    pub fn get_outgoing_stream_context(
        &self,
        owner: OwnerId,
        transport: &TransportId,
    ) -> Result<Option<StreamContext>, KeyManagerError> {
        match self.engine(transport) {
            Some(engine) => Ok(engine.get_outgoing_stream_context(owner)?),
            None => Ok(None),
        }
    }

    /// Recognise and consume an incoming tag.
    pub fn get_incoming_stream_context(
        &self,
        transport: &TransportId,
        tag: &[u8; TAG_LENGTH],
    ) -> Result<Option<StreamContext>, KeyManagerError> {
        match self.engine(transport) {
            Some(engine) => Ok(engine.get_incoming_stream_context(tag)?),
            None => Ok(None),
        }
    }

    /// Look up an incoming tag without consuming it.
    pub fn get_stream_context_only(
        &self,
        transport: &TransportId,
        tag: &[u8; TAG_LENGTH],
    ) -> Option<StreamContext> {
        self.engine(transport)?.get_stream_context_only(tag)
    }

    /// Consume an incoming tag looked up earlier.
    pub fn mark_tag_as_recognised(
        &self,
        transport: &TransportId,
        tag: &[u8; TAG_LENGTH],
    ) -> Result<bool, KeyManagerError> {
        match self.engine(transport) {
            Some(engine) => Ok(engine.mark_tag_as_recognised(tag)?),
            None => Ok(false),
        }
    }

    /// React to a change elsewhere in the system.
    pub fn handle_event(&self, event: KeyManagerEvent) {
        let owner = match event {
            KeyManagerEvent::ContactRemoved(contact) => OwnerId::Contact(contact),
            KeyManagerEvent::PendingContactRemoved(pending) => OwnerId::PendingContact(pending),
        };
        for engine in self.all_engines() {
            engine.remove_owner(owner);
        }
    }
}
