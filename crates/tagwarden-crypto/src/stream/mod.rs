//! Frame-level stream encryption.
//!
//! The stream framer in `tagwarden-core` packs bytes into frames; the types
//! here seal and open those frames. The traits are the seam between the two
//! so the framer can be tested against in-memory fakes.

mod decrypter;
mod encrypter;

use std::io;

pub use decrypter::StreamDecrypter;
pub use encrypter::StreamEncrypter;

/// Writes encrypted frames to an underlying sink.
pub trait FrameEncrypter {
    /// Encrypt and write one frame.
    ///
    /// `payload` is followed on the wire by `padding_length` zero bytes. The
    /// final frame of a stream must have `final_frame` set, and no frame may
    /// be written after it.
    fn write_frame(
        &mut self,
        payload: &[u8],
        padding_length: usize,
        final_frame: bool,
    ) -> io::Result<()>;

    /// Flush buffered output to the underlying sink.
    fn flush(&mut self) -> io::Result<()>;
}

/// Metadata of a frame returned by [`FrameDecrypter::read_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptedFrame {
    /// Number of payload bytes written to the caller's buffer
    pub length: usize,
    /// Whether this was the last frame of the stream
    pub final_frame: bool,
}

/// Reads and decrypts frames from an underlying source.
pub trait FrameDecrypter {
    /// Read the next frame into `payload`.
    ///
    /// `payload` must hold at least `MAX_PAYLOAD_LENGTH` bytes. Returns
    /// `None` once the stream has ended.
    fn read_frame(&mut self, payload: &mut [u8]) -> io::Result<Option<DecryptedFrame>>;
}
