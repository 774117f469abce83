//! Static X25519 key agreement material.
//!
//! Key pairs are built from caller-supplied secret bytes; this crate never
//! touches an RNG.

use serde::{Deserialize, Serialize};
use tagwarden_proto::SECRET_KEY_LENGTH;
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; SECRET_KEY_LENGTH]);

impl PublicKey {
    /// Size in bytes
    pub const SIZE: usize = SECRET_KEY_LENGTH;

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Long-term X25519 key pair used for contact key agreement.
///
/// The secret half is zeroized on drop by `x25519-dalek`.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from 32 secret bytes.
    ///
    /// Callers MUST supply cryptographically secure random bytes in
    /// production. Clamping is applied by the X25519 scalar multiplication.
    #[must_use]
    pub fn from_secret_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey(*X25519PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// Public half of the key pair.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(&X25519PublicKey::from(their_public.0))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree_on_shared_secret() {
        let alice = KeyPair::from_secret_bytes([1; 32]);
        let bob = KeyPair::from_secret_bytes([2; 32]);

        let ab = alice.diffie_hellman(bob.public());
        let ba = bob.diffie_hellman(alice.public());

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn public_key_is_deterministic() {
        let a = KeyPair::from_secret_bytes([9; 32]);
        let b = KeyPair::from_secret_bytes([9; 32]);
        assert_eq!(a.public(), b.public());
    }
}
