//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing or building wire structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed-size structure being parsed
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort {
        /// Required length
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// Payload plus padding does not fit in one frame
    #[error("frame too large: payload {payload} + padding {padding} exceeds {max}")]
    FrameTooLarge {
        /// Payload length in bytes
        payload: usize,
        /// Padding length in bytes
        padding: usize,
        /// Maximum payload plus padding
        max: usize,
    },

    /// Stream header carried a protocol version we do not speak
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Transport identifier was empty
    #[error("transport id must not be empty")]
    EmptyTransportId,
}
