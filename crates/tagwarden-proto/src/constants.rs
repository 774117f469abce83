//! Wire-level constants.
//!
//! Every implementation must agree on these values byte for byte.

/// Protocol version embedded in every recognition tag and stream header.
pub const PROTOCOL_VERSION: u16 = 4;

/// Length of a recognition tag in bytes.
pub const TAG_LENGTH: usize = 16;

/// Length of a symmetric key in bytes.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Length of the Poly1305 authentication tag appended to each ciphertext.
pub const MAC_LENGTH: usize = 16;

/// Length of the nonce that prefixes the stream header.
pub const STREAM_HEADER_NONCE_LENGTH: usize = 24;

/// Stream header plaintext: protocol version (2), stream number (8), frame
/// key (32).
pub const STREAM_HEADER_PLAINTEXT_LENGTH: usize = 2 + 8 + SECRET_KEY_LENGTH;

/// Length of the stream header on the wire.
pub const STREAM_HEADER_LENGTH: usize =
    STREAM_HEADER_NONCE_LENGTH + STREAM_HEADER_PLAINTEXT_LENGTH + MAC_LENGTH;

/// Length of a frame nonce.
pub const FRAME_NONCE_LENGTH: usize = 24;

/// Frame header plaintext: payload length (2), padding length (2).
pub const FRAME_HEADER_PLAINTEXT_LENGTH: usize = 4;

/// Length of an encrypted frame header on the wire.
pub const FRAME_HEADER_LENGTH: usize = FRAME_HEADER_PLAINTEXT_LENGTH + MAC_LENGTH;

/// Maximum length of a frame on the wire, header included.
pub const MAX_FRAME_LENGTH: usize = 1024;

/// Maximum payload plus padding carried by a single frame.
pub const MAX_PAYLOAD_LENGTH: usize = MAX_FRAME_LENGTH - FRAME_HEADER_LENGTH - MAC_LENGTH;

/// Width of the reordering window in bits. A power of two, byte-aligned.
pub const REORDERING_WINDOW_SIZE: usize = 32;

/// Maximum clock skew tolerated between peers (24 hours).
pub const MAX_CLOCK_DIFFERENCE_MS: u64 = 24 * 60 * 60 * 1000;

/// Largest stream number that can be encoded into a tag.
pub const MAX_32_BIT_UNSIGNED: u64 = u32::MAX as u64;

const _: () = assert!(REORDERING_WINDOW_SIZE.is_power_of_two());
const _: () = assert!(REORDERING_WINDOW_SIZE % 8 == 0);
const _: () = assert!(MAX_PAYLOAD_LENGTH < 0x8000);
