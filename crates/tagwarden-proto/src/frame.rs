//! Frame and stream header layouts with zero-copy parsing.
//!
//! Both headers are encrypted on the wire. The layouts here describe the
//! plaintext that sits inside the AEAD envelope.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    constants::{
        FRAME_HEADER_PLAINTEXT_LENGTH, FRAME_NONCE_LENGTH, MAX_PAYLOAD_LENGTH, PROTOCOL_VERSION,
        SECRET_KEY_LENGTH, STREAM_HEADER_PLAINTEXT_LENGTH,
    },
    errors::{ProtocolError, Result},
};

/// Bit in byte 0 of the frame header marking the last frame of a stream.
const FINAL_FLAG: u8 = 0x80;

/// Bit in byte 0 of a frame nonce separating header nonces from body nonces.
const HEADER_NONCE_FLAG: u8 = 0x80;

/// Plaintext frame header (Big Endian).
///
/// ```text
/// ┌───────────────────────┬─────────────────────┐
/// │ F | payload length    │ padding length      │
/// │ 1 bit | 15 bits       │ 16 bits             │
/// └───────────────────────┴─────────────────────┘
/// ```
///
/// # Invariants
///
/// - `payload_length + padding_length <= MAX_PAYLOAD_LENGTH`
/// - The final flag (`F`) is set on exactly one frame per stream
#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    payload_length: [u8; 2],
    padding_length: [u8; 2],
}

impl FrameHeader {
    /// Size of the plaintext header
    pub const SIZE: usize = FRAME_HEADER_PLAINTEXT_LENGTH;

    /// Build a header for a frame carrying `payload_length` bytes of payload
    /// followed by `padding_length` zero bytes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if payload plus padding exceeds
    ///   `MAX_PAYLOAD_LENGTH`
    pub fn new(payload_length: usize, padding_length: usize, final_frame: bool) -> Result<Self> {
        check_lengths(payload_length, padding_length)?;

        let mut payload = (payload_length as u16).to_be_bytes();
        if final_frame {
            payload[0] |= FINAL_FLAG;
        }

        Ok(Self { payload_length: payload, padding_length: (padding_length as u16).to_be_bytes() })
    }

    /// Parse a decrypted header.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::BufferTooShort` if fewer than 4 bytes are supplied
    /// - `ProtocolError::FrameTooLarge` if the lengths exceed one frame
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (header, _) = Self::read_from_prefix(bytes).map_err(|_| {
            ProtocolError::BufferTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        check_lengths(header.payload_length(), header.padding_length())?;
        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Number of payload bytes in the frame.
    pub fn payload_length(&self) -> usize {
        let mut bytes = self.payload_length;
        bytes[0] &= !FINAL_FLAG;
        usize::from(u16::from_be_bytes(bytes))
    }

    /// Number of zero padding bytes following the payload.
    pub fn padding_length(&self) -> usize {
        usize::from(u16::from_be_bytes(self.padding_length))
    }

    /// Whether this is the last frame of the stream.
    pub fn is_final(&self) -> bool {
        self.payload_length[0] & FINAL_FLAG != 0
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("payload_length", &self.payload_length())
            .field("padding_length", &self.padding_length())
            .field("final", &self.is_final())
            .finish()
    }
}

fn check_lengths(payload: usize, padding: usize) -> Result<()> {
    if payload.saturating_add(padding) > MAX_PAYLOAD_LENGTH {
        return Err(ProtocolError::FrameTooLarge { payload, padding, max: MAX_PAYLOAD_LENGTH });
    }
    Ok(())
}

/// Plaintext stream header (Big Endian).
///
/// Carries the protocol version, the stream number (which the receiver
/// already learned from the tag and must match) and a fresh random frame key.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct StreamHeaderPlaintext {
    version: [u8; 2],
    stream_number: [u8; 8],
    frame_key: [u8; SECRET_KEY_LENGTH],
}

impl StreamHeaderPlaintext {
    /// Size of the plaintext header
    pub const SIZE: usize = STREAM_HEADER_PLAINTEXT_LENGTH;

    /// Build a header for the current protocol version.
    #[must_use]
    pub fn new(stream_number: u64, frame_key: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_be_bytes(),
            stream_number: stream_number.to_be_bytes(),
            frame_key,
        }
    }

    /// Parse a decrypted stream header.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::BufferTooShort` if fewer than 42 bytes are supplied
    /// - `ProtocolError::UnsupportedVersion` if the version is not ours
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (header, _) = Self::read_from_prefix(bytes).map_err(|_| {
            ProtocolError::BufferTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if header.version() != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version()));
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol version.
    pub fn version(&self) -> u16 {
        u16::from_be_bytes(self.version)
    }

    /// Stream number the sender used for this stream.
    pub fn stream_number(&self) -> u64 {
        u64::from_be_bytes(self.stream_number)
    }

    /// Key protecting the frames of this stream.
    pub fn frame_key(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.frame_key
    }
}

/// Build the nonce for frame `frame_number`.
///
/// Structure:
/// - bytes 0-7: frame number (big-endian), top bit set for header nonces
/// - bytes 8-23: zero
///
/// Header and body nonces for the same frame never collide because frame
/// numbers stay below 2^63.
#[must_use]
pub fn frame_nonce(frame_number: u64, header: bool) -> [u8; FRAME_NONCE_LENGTH] {
    debug_assert!(frame_number < 1 << 63);

    let mut nonce = [0u8; FRAME_NONCE_LENGTH];
    nonce[0..8].copy_from_slice(&frame_number.to_be_bytes());
    if header {
        nonce[0] |= HEADER_NONCE_FLAG;
    }
    nonce
}
