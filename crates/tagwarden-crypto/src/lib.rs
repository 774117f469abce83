//! Tagwarden Cryptographic Primitives
//!
//! Cryptographic building blocks for the transport layer. Pure functions with
//! deterministic outputs. Callers provide random bytes (frame keys, nonces,
//! key pairs) so every operation can be replayed in tests.
//!
//! # Key Lifecycle
//!
//! ```text
//! Static key agreement (X25519)
//!        │
//!        ▼
//! HKDF → Static master key → Handshake root key
//!        │
//!        ├── Handshake mode: keys per period, derived directly from the root
//!        │
//!        └── Rotation mode: keys for period P derived by rotating period P-1
//!               │
//!               ▼
//!        Tag key ──HMAC──► Recognition tags (one per stream number)
//!        Header key ─AEAD─► Stream header ──► Frame key ─AEAD─► Frames
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Rotation-mode keys for period P are a one-way function of the keys for
//!   period P-1. Discarding old periods makes their traffic unrecoverable.
//! - Every stream uses a fresh random frame key, so compromising one stream
//!   does not expose another.
//!
//! Unlinkability:
//! - Tags are pseudo-random without the tag key. Distinct roles (Alice/Bob)
//!   and distinct transports derive independent tag keys.
//!
//! Authenticity:
//! - Stream headers and every frame are XChaCha20-Poly1305 sealed.
//! - Header and body nonces are separated by a flag bit, so no nonce is ever
//!   reused under one frame key.

#![forbid(unsafe_code)]

pub mod agreement;
pub mod error;
pub mod keys;
pub mod secret;
pub mod stream;
pub mod transport;

pub use agreement::{KeyPair, PublicKey};
pub use error::CryptoError;
pub use keys::{HandshakeRoot, IncomingKeys, OutgoingKeys, TransportKeys};
pub use secret::SecretKey;
pub use stream::{
    DecryptedFrame, FrameDecrypter, FrameEncrypter, StreamDecrypter, StreamEncrypter,
};
pub use transport::{HkdfTransportCrypto, TransportCrypto};
