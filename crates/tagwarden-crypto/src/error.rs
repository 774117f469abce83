//! Cryptographic error types.

use tagwarden_proto::ProtocolError;
use thiserror::Error;

/// Errors raised by key derivation, key agreement and stream encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation requested for a period that has no predecessor
    #[error("invalid rotation period {period}: must be at least 1")]
    InvalidPeriod {
        /// Period that was requested
        period: u64,
    },

    /// Key agreement produced an all-zero shared secret
    ///
    /// The peer supplied a low-order public key. Fatal for this contact.
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,

    /// AEAD authentication failed
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// What was being decrypted
        reason: &'static str,
    },

    /// Stream header names a different stream than the tag did
    #[error("stream number mismatch: expected {expected}, got {actual}")]
    StreamNumberMismatch {
        /// Stream number recognised from the tag
        expected: u64,
        /// Stream number carried in the header
        actual: u64,
    },

    /// Frame padding contained non-zero bytes
    #[error("frame padding is not zero")]
    NonZeroPadding,

    /// No more frames can be written under this frame key
    #[error("frame counter exhausted after {frames} frames")]
    FrameCounterExhausted {
        /// Frames already written
        frames: u64,
    },

    /// Input stream ended before the final frame
    #[error("stream truncated before final frame")]
    Truncated,

    /// Malformed wire structure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CryptoError {
    /// Returns true if the stream or contact must be abandoned.
    ///
    /// Every cryptographic failure is fatal except running out of frames,
    /// which only requires opening a new stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::FrameCounterExhausted { .. })
    }
}

impl From<CryptoError> for std::io::Error {
    fn from(err: CryptoError) -> Self {
        let kind = match err {
            CryptoError::Truncated => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}
