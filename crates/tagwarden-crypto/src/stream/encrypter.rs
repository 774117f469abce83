//! Outgoing stream encryption using `XChaCha20-Poly1305`.

use std::io::{self, Write};

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use tagwarden_proto::{
    FrameHeader, MAX_32_BIT_UNSIGNED, MAX_PAYLOAD_LENGTH, SECRET_KEY_LENGTH,
    STREAM_HEADER_NONCE_LENGTH, StreamHeaderPlaintext, TAG_LENGTH, frame_nonce,
};

use super::FrameEncrypter;
use crate::{error::CryptoError, secret::SecretKey};

/// Encrypts frames and writes them to `W`.
///
/// The optional recognition tag and the stream header are written lazily,
/// immediately before the first frame.
///
/// # Security
///
/// - The frame key and header nonce MUST come from a cryptographically secure
///   RNG. Reusing a frame key across streams reuses frame nonces.
/// - Frame nonces are the frame counter, so at most 2^32 - 1 frames are
///   written per stream.
pub struct StreamEncrypter<W: Write> {
    out: W,
    tag: Option<[u8; TAG_LENGTH]>,
    header_key: SecretKey,
    header_nonce: [u8; STREAM_HEADER_NONCE_LENGTH],
    frame_key: SecretKey,
    stream_number: u64,
    frame_counter: u64,
    header_written: bool,
    finished: bool,
}

impl<W: Write> StreamEncrypter<W> {
    /// Create an encrypter for stream `stream_number`.
    ///
    /// `tag` is `None` when the recognition tag is carried out of band.
    pub fn new(
        out: W,
        tag: Option<[u8; TAG_LENGTH]>,
        header_key: SecretKey,
        stream_number: u64,
        header_nonce: [u8; STREAM_HEADER_NONCE_LENGTH],
        frame_key: [u8; SECRET_KEY_LENGTH],
    ) -> Self {
        Self {
            out,
            tag,
            header_key,
            header_nonce,
            frame_key: SecretKey::from_bytes(frame_key),
            stream_number,
            frame_counter: 0,
            header_written: false,
            finished: false,
        }
    }

    /// Underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Consume the encrypter, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_stream_header(&mut self) -> io::Result<()> {
        if let Some(tag) = self.tag {
            self.out.write_all(&tag)?;
        }

        let plaintext =
            StreamHeaderPlaintext::new(self.stream_number, *self.frame_key.as_bytes()).to_bytes();
        let cipher = XChaCha20Poly1305::new(self.header_key.as_bytes().into());
        let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&self.header_nonce), &plaintext[..])
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        self.out.write_all(&self.header_nonce)?;
        self.out.write_all(&ciphertext)?;
        self.header_written = true;
        Ok(())
    }
}

impl<W: Write> FrameEncrypter for StreamEncrypter<W> {
    fn write_frame(
        &mut self,
        payload: &[u8],
        padding_length: usize,
        final_frame: bool,
    ) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::other("frame written after final frame"));
        }
        if self.frame_counter >= MAX_32_BIT_UNSIGNED {
            return Err(CryptoError::FrameCounterExhausted { frames: self.frame_counter }.into());
        }

        let header = FrameHeader::new(payload.len(), padding_length, final_frame)
            .map_err(CryptoError::from)?;

        if !self.header_written {
            self.write_stream_header()?;
        }

        let cipher = XChaCha20Poly1305::new(self.frame_key.as_bytes().into());

        let header_nonce = frame_nonce(self.frame_counter, true);
        let Ok(header_ciphertext) =
            cipher.encrypt(XNonce::from_slice(&header_nonce), &header.to_bytes()[..])
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        debug_assert!(payload.len() + padding_length <= MAX_PAYLOAD_LENGTH);
        let mut body = Vec::with_capacity(payload.len() + padding_length);
        body.extend_from_slice(payload);
        body.resize(payload.len() + padding_length, 0);

        let body_nonce = frame_nonce(self.frame_counter, false);
        let Ok(body_ciphertext) = cipher.encrypt(XNonce::from_slice(&body_nonce), body.as_slice())
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        self.out.write_all(&header_ciphertext)?;
        self.out.write_all(&body_ciphertext)?;

        self.frame_counter += 1;
        self.finished = final_frame;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
