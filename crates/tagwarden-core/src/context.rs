//! Keys and identifiers needed to encrypt or decrypt one stream.

use tagwarden_crypto::SecretKey;
use tagwarden_proto::{OwnerId, TransportId};

/// Everything needed to encrypt or decrypt one stream.
///
/// Handed out by the key engine for each outgoing stream, and for each
/// incoming stream whose tag was recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContext {
    /// Contact or pending contact on the other end
    pub owner: OwnerId,
    /// Transport carrying the stream
    pub transport_id: TransportId,
    /// Key the recognition tag was computed with
    pub tag_key: SecretKey,
    /// Key for the stream header
    pub header_key: SecretKey,
    /// Stream number, bound into the tag and the stream header
    pub stream_number: u32,
    /// Whether the keys came from a key set in handshake mode
    pub handshake_mode: bool,
}
