//! Transport key derivation and recognition tags.
//!
//! Two derivation modes exist:
//!
//! - Rotation mode: keys for the period before the creation period come
//!   straight from the root key; each later period is a one-way rotation of
//!   the one before. Old root material is not retained.
//! - Handshake mode: every period is derived directly from the root key,
//!   which the key set keeps. Used while key agreement is still in progress
//!   and the peers have not agreed on a starting period.
//!
//! Alice and Bob use opposite labels, so one peer's outgoing keys are the
//! other peer's incoming keys.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tagwarden_proto::{SECRET_KEY_LENGTH, TAG_LENGTH, TransportId};

use crate::{
    agreement::{KeyPair, PublicKey},
    error::CryptoError,
    keys::{HandshakeRoot, IncomingKeys, OutgoingKeys, TransportKeys},
    secret::SecretKey,
};

type HmacSha256 = Hmac<Sha256>;

const STATIC_MASTER_KEY_LABEL: &[u8] = b"tagwarden/static-master-key";
const CONTACT_ROOT_KEY_LABEL: &[u8] = b"tagwarden/contact-root-key";
const PENDING_CONTACT_ROOT_KEY_LABEL: &[u8] = b"tagwarden/pending-contact-root-key";

const ROTATE_LABEL: &[u8] = b"tagwarden/transport/rotate";
const ALICE_TAG_LABEL: &[u8] = b"tagwarden/transport/alice-tag";
const BOB_TAG_LABEL: &[u8] = b"tagwarden/transport/bob-tag";
const ALICE_HEADER_LABEL: &[u8] = b"tagwarden/transport/alice-header";
const BOB_HEADER_LABEL: &[u8] = b"tagwarden/transport/bob-header";
const ALICE_HANDSHAKE_TAG_LABEL: &[u8] = b"tagwarden/transport/alice-handshake-tag";
const BOB_HANDSHAKE_TAG_LABEL: &[u8] = b"tagwarden/transport/bob-handshake-tag";
const ALICE_HANDSHAKE_HEADER_LABEL: &[u8] = b"tagwarden/transport/alice-handshake-header";
const BOB_HANDSHAKE_HEADER_LABEL: &[u8] = b"tagwarden/transport/bob-handshake-header";

/// Key derivation and tag encoding consumed by the key engine.
///
/// Implementations must be deterministic: the same inputs always produce the
/// same keys, on both peers.
pub trait TransportCrypto: Clone + Send + Sync + 'static {
    /// Whether the local peer plays the Alice role with this contact.
    ///
    /// The peer with the lexicographically lower public key is Alice.
    fn is_alice(&self, their_public: &PublicKey, our_key_pair: &KeyPair) -> bool;

    /// Derive the static master key shared with a contact.
    ///
    /// # Errors
    ///
    /// - `CryptoError::NonContributory` if the peer's key is low-order
    fn derive_static_master_key(
        &self,
        their_public: &PublicKey,
        our_key_pair: &KeyPair,
    ) -> Result<SecretKey, CryptoError>;

    /// Derive the handshake root key from the static master key.
    ///
    /// Contacts and pending contacts use distinct labels, so the same key
    /// agreement never yields the same root for both.
    fn derive_handshake_root_key(
        &self,
        static_master_key: &SecretKey,
        pending_contact: bool,
    ) -> SecretKey;

    /// Derive rotation-mode keys whose current period is `period`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidPeriod` if `period` is zero
    fn derive_rotation_keys(
        &self,
        transport: &TransportId,
        root_key: &SecretKey,
        period: u64,
        alice: bool,
        active: bool,
    ) -> Result<TransportKeys, CryptoError>;

    /// Derive handshake-mode keys whose current period is `period`.
    ///
    /// Outgoing handshake keys are always active.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidPeriod` if `period` is zero
    fn derive_handshake_keys(
        &self,
        transport: &TransportId,
        root_key: &SecretKey,
        period: u64,
        alice: bool,
    ) -> Result<TransportKeys, CryptoError>;

    /// Move `keys` forward to `period`.
    ///
    /// Keys already at or past `period` are returned unchanged. Reordering
    /// windows of incoming slots that survive the shift are kept.
    fn update_transport_keys(
        &self,
        keys: &TransportKeys,
        period: u64,
    ) -> Result<TransportKeys, CryptoError>;

    /// Recognition tag for `stream_number` under `tag_key`.
    fn encode_tag(
        &self,
        tag_key: &SecretKey,
        protocol_version: u16,
        stream_number: u32,
    ) -> [u8; TAG_LENGTH];
}

/// Production [`TransportCrypto`]: HKDF-SHA256 derivation, HMAC-SHA256 tags,
/// X25519 agreement.
#[derive(Debug, Clone, Copy, Default)]
pub struct HkdfTransportCrypto;

impl HkdfTransportCrypto {
    /// Create the crypto provider.
    pub fn new() -> Self {
        Self
    }

    fn rotate_key(key: &SecretKey, period: u64) -> SecretKey {
        derive_key(ROTATE_LABEL, key.as_bytes(), &[&period.to_be_bytes()])
    }

    fn tag_key(root_key: &SecretKey, transport: &TransportId, belongs_to_alice: bool) -> SecretKey {
        let label = if belongs_to_alice { ALICE_TAG_LABEL } else { BOB_TAG_LABEL };
        derive_key(label, root_key.as_bytes(), &[transport.as_bytes()])
    }

    fn header_key(
        root_key: &SecretKey,
        transport: &TransportId,
        belongs_to_alice: bool,
    ) -> SecretKey {
        let label = if belongs_to_alice { ALICE_HEADER_LABEL } else { BOB_HEADER_LABEL };
        derive_key(label, root_key.as_bytes(), &[transport.as_bytes()])
    }

    fn handshake_key(
        label: &[u8],
        root_key: &SecretKey,
        transport: &TransportId,
        period: u64,
    ) -> SecretKey {
        derive_key(label, root_key.as_bytes(), &[transport.as_bytes(), &period.to_be_bytes()])
    }

    fn incoming_handshake_keys(
        transport: &TransportId,
        root_key: &SecretKey,
        alice: bool,
        period: u64,
    ) -> IncomingKeys {
        // Incoming keys belong to the peer
        let (tag_label, header_label) = if alice {
            (BOB_HANDSHAKE_TAG_LABEL, BOB_HANDSHAKE_HEADER_LABEL)
        } else {
            (ALICE_HANDSHAKE_TAG_LABEL, ALICE_HANDSHAKE_HEADER_LABEL)
        };
        IncomingKeys::new(
            Self::handshake_key(tag_label, root_key, transport, period),
            Self::handshake_key(header_label, root_key, transport, period),
            period,
        )
    }

    fn outgoing_handshake_keys(
        transport: &TransportId,
        root_key: &SecretKey,
        alice: bool,
        period: u64,
    ) -> OutgoingKeys {
        let (tag_label, header_label) = if alice {
            (ALICE_HANDSHAKE_TAG_LABEL, ALICE_HANDSHAKE_HEADER_LABEL)
        } else {
            (BOB_HANDSHAKE_TAG_LABEL, BOB_HANDSHAKE_HEADER_LABEL)
        };
        OutgoingKeys::new(
            Self::handshake_key(tag_label, root_key, transport, period),
            Self::handshake_key(header_label, root_key, transport, period),
            period,
            true,
        )
    }

    fn update_handshake_keys(
        &self,
        keys: &TransportKeys,
        root: &HandshakeRoot,
        period: u64,
    ) -> Result<TransportKeys, CryptoError> {
        let transport = &keys.transport_id;
        let elapsed = period.saturating_sub(keys.period());

        match elapsed {
            0 => Ok(keys.clone()),
            // Shift by one period, keeping the windows of retained slots
            1 => Ok(TransportKeys {
                transport_id: transport.clone(),
                previous_incoming: keys.current_incoming.clone(),
                current_incoming: keys.next_incoming.clone(),
                next_incoming: Self::incoming_handshake_keys(
                    transport,
                    &root.root_key,
                    root.alice,
                    period + 1,
                ),
                current_outgoing: Self::outgoing_handshake_keys(
                    transport,
                    &root.root_key,
                    root.alice,
                    period,
                ),
                handshake: Some(root.clone()),
            }),
            // Shift by two periods: only the old next slot survives
            2 => Ok(TransportKeys {
                transport_id: transport.clone(),
                previous_incoming: keys.next_incoming.clone(),
                current_incoming: Self::incoming_handshake_keys(
                    transport,
                    &root.root_key,
                    root.alice,
                    period,
                ),
                next_incoming: Self::incoming_handshake_keys(
                    transport,
                    &root.root_key,
                    root.alice,
                    period + 1,
                ),
                current_outgoing: Self::outgoing_handshake_keys(
                    transport,
                    &root.root_key,
                    root.alice,
                    period,
                ),
                handshake: Some(root.clone()),
            }),
            _ => self.derive_handshake_keys(transport, &root.root_key, period, root.alice),
        }
    }

    fn update_rotation_keys(keys: &TransportKeys, period: u64) -> TransportKeys {
        if keys.period() >= period {
            return keys.clone();
        }

        let mut previous = keys.previous_incoming.clone();
        let mut current = keys.current_incoming.clone();
        let mut next = keys.next_incoming.clone();
        let mut outgoing = keys.current_outgoing.clone();
        let active = outgoing.active;

        for p in keys.period() + 1..=period {
            let next_tag = Self::rotate_key(&next.tag_key, p + 1);
            let next_header = Self::rotate_key(&next.header_key, p + 1);
            previous = current;
            current = next;
            next = IncomingKeys::new(next_tag, next_header, p + 1);

            outgoing = OutgoingKeys::new(
                Self::rotate_key(&outgoing.tag_key, p),
                Self::rotate_key(&outgoing.header_key, p),
                p,
                active,
            );
        }

        TransportKeys {
            transport_id: keys.transport_id.clone(),
            previous_incoming: previous,
            current_incoming: current,
            next_incoming: next,
            current_outgoing: outgoing,
            handshake: None,
        }
    }
}

impl TransportCrypto for HkdfTransportCrypto {
    fn is_alice(&self, their_public: &PublicKey, our_key_pair: &KeyPair) -> bool {
        our_key_pair.public() < their_public
    }

    fn derive_static_master_key(
        &self,
        their_public: &PublicKey,
        our_key_pair: &KeyPair,
    ) -> Result<SecretKey, CryptoError> {
        let shared = our_key_pair.diffie_hellman(their_public);
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        let ours = our_key_pair.public();
        let (first, second) = if self.is_alice(their_public, our_key_pair) {
            (ours, their_public)
        } else {
            (their_public, ours)
        };

        Ok(derive_key(
            STATIC_MASTER_KEY_LABEL,
            shared.as_bytes(),
            &[first.as_bytes(), second.as_bytes()],
        ))
    }

    fn derive_handshake_root_key(
        &self,
        static_master_key: &SecretKey,
        pending_contact: bool,
    ) -> SecretKey {
        let label =
            if pending_contact { PENDING_CONTACT_ROOT_KEY_LABEL } else { CONTACT_ROOT_KEY_LABEL };
        derive_key(label, static_master_key.as_bytes(), &[])
    }

    fn derive_rotation_keys(
        &self,
        transport: &TransportId,
        root_key: &SecretKey,
        period: u64,
        alice: bool,
        active: bool,
    ) -> Result<TransportKeys, CryptoError> {
        if period == 0 {
            return Err(CryptoError::InvalidPeriod { period });
        }

        // Keys for the previous period come straight from the root key
        let in_tag_prev = Self::tag_key(root_key, transport, !alice);
        let in_header_prev = Self::header_key(root_key, transport, !alice);
        let out_tag_prev = Self::tag_key(root_key, transport, alice);
        let out_header_prev = Self::header_key(root_key, transport, alice);

        let in_tag_curr = Self::rotate_key(&in_tag_prev, period);
        let in_header_curr = Self::rotate_key(&in_header_prev, period);
        let in_tag_next = Self::rotate_key(&in_tag_curr, period + 1);
        let in_header_next = Self::rotate_key(&in_header_curr, period + 1);
        let out_tag_curr = Self::rotate_key(&out_tag_prev, period);
        let out_header_curr = Self::rotate_key(&out_header_prev, period);

        Ok(TransportKeys {
            transport_id: transport.clone(),
            previous_incoming: IncomingKeys::new(in_tag_prev, in_header_prev, period - 1),
            current_incoming: IncomingKeys::new(in_tag_curr, in_header_curr, period),
            next_incoming: IncomingKeys::new(in_tag_next, in_header_next, period + 1),
            current_outgoing: OutgoingKeys::new(out_tag_curr, out_header_curr, period, active),
            handshake: None,
        })
    }

    fn derive_handshake_keys(
        &self,
        transport: &TransportId,
        root_key: &SecretKey,
        period: u64,
        alice: bool,
    ) -> Result<TransportKeys, CryptoError> {
        if period == 0 {
            return Err(CryptoError::InvalidPeriod { period });
        }

        Ok(TransportKeys {
            transport_id: transport.clone(),
            previous_incoming: Self::incoming_handshake_keys(transport, root_key, alice, period - 1),
            current_incoming: Self::incoming_handshake_keys(transport, root_key, alice, period),
            next_incoming: Self::incoming_handshake_keys(transport, root_key, alice, period + 1),
            current_outgoing: Self::outgoing_handshake_keys(transport, root_key, alice, period),
            handshake: Some(HandshakeRoot { root_key: root_key.clone(), alice }),
        })
    }

    fn update_transport_keys(
        &self,
        keys: &TransportKeys,
        period: u64,
    ) -> Result<TransportKeys, CryptoError> {
        match &keys.handshake {
            Some(root) => self.update_handshake_keys(keys, root, period),
            None => Ok(Self::update_rotation_keys(keys, period)),
        }
    }

    fn encode_tag(
        &self,
        tag_key: &SecretKey,
        protocol_version: u16,
        stream_number: u32,
    ) -> [u8; TAG_LENGTH] {
        let Ok(mut mac) = HmacSha256::new_from_slice(tag_key.as_bytes()) else {
            unreachable!("HMAC-SHA256 accepts keys of any length");
        };
        mac.update(&protocol_version.to_be_bytes());
        mac.update(&u64::from(stream_number).to_be_bytes());
        let output = mac.finalize().into_bytes();

        let mut tag = [0u8; TAG_LENGTH];
        tag.copy_from_slice(&output[..TAG_LENGTH]);
        tag
    }
}

/// HKDF-SHA256 with a length-prefixed info string.
///
/// info = len(label) || label || (len(input) || input)*
///
/// Length prefixes keep distinct input lists from colliding.
fn derive_key(label: &[u8], secret: &[u8], inputs: &[&[u8]]) -> SecretKey {
    let hkdf = Hkdf::<Sha256>::new(None, secret);

    let capacity = 4 + label.len() + inputs.iter().map(|i| 4 + i.len()).sum::<usize>();
    let mut info = Vec::with_capacity(capacity);
    info.extend_from_slice(&(label.len() as u32).to_be_bytes());
    info.extend_from_slice(label);
    for input in inputs {
        info.extend_from_slice(&(input.len() as u32).to_be_bytes());
        info.extend_from_slice(input);
    }

    let mut okm = [0u8; SECRET_KEY_LENGTH];
    let Ok(()) = hkdf.expand(&info, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SecretKey::from_bytes(okm)
}
