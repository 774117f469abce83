//! Tagwarden wire protocol
//!
//! Fixed-size layouts and identifiers shared by every layer of the transport
//! security stack. Nothing in this crate performs I/O or cryptography; it only
//! describes the bytes that travel on the wire and the identifiers that key
//! material is filed under.
//!
//! # Stream Layout
//!
//! ```text
//! ┌─────────┬──────────────────┬─────────────────────────────┐
//! │ Tag     │ Stream header    │ Frame 0 │ Frame 1 │ ...     │
//! │ 16 B    │ 82 B             │ ≤ 1024 B each               │
//! └─────────┴──────────────────┴─────────────────────────────┘
//! ```
//!
//! The tag is a pseudo-random function of a tag key and a stream number. The
//! receiver recognises the tag without learning anything else about the
//! sender. The stream header carries a fresh frame key under the header key,
//! and every frame is an encrypted 4-byte [`FrameHeader`] followed by the
//! encrypted payload and padding.

pub mod constants;
pub mod errors;
pub mod frame;
pub mod ids;

pub use constants::{
    FRAME_HEADER_LENGTH, FRAME_HEADER_PLAINTEXT_LENGTH, FRAME_NONCE_LENGTH, MAC_LENGTH,
    MAX_32_BIT_UNSIGNED, MAX_CLOCK_DIFFERENCE_MS, MAX_FRAME_LENGTH, MAX_PAYLOAD_LENGTH,
    PROTOCOL_VERSION, REORDERING_WINDOW_SIZE, SECRET_KEY_LENGTH, STREAM_HEADER_LENGTH,
    STREAM_HEADER_NONCE_LENGTH, STREAM_HEADER_PLAINTEXT_LENGTH, TAG_LENGTH,
};
pub use errors::{ProtocolError, Result};
pub use frame::{FrameHeader, StreamHeaderPlaintext, frame_nonce};
pub use ids::{ContactId, KeySetId, OwnerId, PendingContactId, TransportId};
