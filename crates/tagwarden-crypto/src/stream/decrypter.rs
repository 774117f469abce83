//! Incoming stream decryption using `XChaCha20-Poly1305`.

use std::io::{self, Read};

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use tagwarden_proto::{
    FRAME_HEADER_LENGTH, FrameHeader, MAC_LENGTH, MAX_32_BIT_UNSIGNED, MAX_PAYLOAD_LENGTH,
    STREAM_HEADER_LENGTH, STREAM_HEADER_NONCE_LENGTH, StreamHeaderPlaintext, frame_nonce,
};

use super::{DecryptedFrame, FrameDecrypter};
use crate::{error::CryptoError, secret::SecretKey};

/// Reads frames from `R` and decrypts them.
///
/// The recognition tag must already have been consumed from `R`; the
/// decrypter starts at the stream header.
///
/// # Errors
///
/// Every authentication failure is fatal: the stream is abandoned and the
/// caller should drop the connection. Reaching end of input before the final
/// frame is reported as `UnexpectedEof`.
pub struct StreamDecrypter<R: Read> {
    input: R,
    header_key: SecretKey,
    stream_number: u64,
    frame_key: Option<SecretKey>,
    frame_counter: u64,
    finished: bool,
}

impl<R: Read> StreamDecrypter<R> {
    /// Create a decrypter for stream `stream_number`.
    pub fn new(input: R, header_key: SecretKey, stream_number: u64) -> Self {
        Self { input, header_key, stream_number, frame_key: None, frame_counter: 0, finished: false }
    }

    /// Consume the decrypter, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.input
    }

    fn read_stream_header(&mut self) -> io::Result<SecretKey> {
        let mut header = [0u8; STREAM_HEADER_LENGTH];
        read_exact_or_truncated(&mut self.input, &mut header)?;

        let (nonce, ciphertext) = header.split_at(STREAM_HEADER_NONCE_LENGTH);
        let cipher = XChaCha20Poly1305::new(self.header_key.as_bytes().into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed { reason: "stream header" })?;

        let parsed = StreamHeaderPlaintext::parse(&plaintext).map_err(CryptoError::from)?;
        if parsed.stream_number() != self.stream_number {
            return Err(CryptoError::StreamNumberMismatch {
                expected: self.stream_number,
                actual: parsed.stream_number(),
            }
            .into());
        }

        Ok(SecretKey::from_bytes(*parsed.frame_key()))
    }
}

impl<R: Read> FrameDecrypter for StreamDecrypter<R> {
    fn read_frame(&mut self, payload: &mut [u8]) -> io::Result<Option<DecryptedFrame>> {
        if self.finished {
            return Ok(None);
        }
        debug_assert!(payload.len() >= MAX_PAYLOAD_LENGTH);

        let frame_key = match self.frame_key.take() {
            Some(key) => key,
            None => self.read_stream_header()?,
        };
        let cipher = XChaCha20Poly1305::new(frame_key.as_bytes().into());
        self.frame_key = Some(frame_key);

        if self.frame_counter >= MAX_32_BIT_UNSIGNED {
            return Err(CryptoError::FrameCounterExhausted { frames: self.frame_counter }.into());
        }

        let mut header_ciphertext = [0u8; FRAME_HEADER_LENGTH];
        read_exact_or_truncated(&mut self.input, &mut header_ciphertext)?;
        let header_nonce = frame_nonce(self.frame_counter, true);
        let header_plaintext = cipher
            .decrypt(XNonce::from_slice(&header_nonce), &header_ciphertext[..])
            .map_err(|_| CryptoError::DecryptionFailed { reason: "frame header" })?;
        let header = FrameHeader::parse(&header_plaintext).map_err(CryptoError::from)?;

        let body_length = header.payload_length() + header.padding_length();
        let mut body_ciphertext = vec![0u8; body_length + MAC_LENGTH];
        read_exact_or_truncated(&mut self.input, &mut body_ciphertext)?;
        let body_nonce = frame_nonce(self.frame_counter, false);
        let body = cipher
            .decrypt(XNonce::from_slice(&body_nonce), body_ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed { reason: "frame body" })?;

        let (data, padding) = body.split_at(header.payload_length());
        if padding.iter().any(|&b| b != 0) {
            return Err(CryptoError::NonZeroPadding.into());
        }
        payload[..data.len()].copy_from_slice(data);

        self.frame_counter += 1;
        self.finished = header.is_final();
        Ok(Some(DecryptedFrame { length: data.len(), final_frame: header.is_final() }))
    }
}

fn read_exact_or_truncated<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof { CryptoError::Truncated.into() } else { e }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::stream::{FrameEncrypter, StreamEncrypter};

    const HEADER_KEY: [u8; 32] = [0x21; 32];
    const FRAME_KEY: [u8; 32] = [0x42; 32];
    const NONCE: [u8; 24] = [0x07; 24];

    fn encrypt(frames: &[(&[u8], usize, bool)], stream_number: u64) -> Vec<u8> {
        let mut encrypter = StreamEncrypter::new(
            Vec::new(),
            None,
            SecretKey::from_bytes(HEADER_KEY),
            stream_number,
            NONCE,
            FRAME_KEY,
        );
        for (payload, padding, final_frame) in frames {
            encrypter.write_frame(payload, *padding, *final_frame).unwrap();
        }
        encrypter.into_inner()
    }

    fn decrypter(bytes: Vec<u8>, stream_number: u64) -> StreamDecrypter<Cursor<Vec<u8>>> {
        StreamDecrypter::new(Cursor::new(bytes), SecretKey::from_bytes(HEADER_KEY), stream_number)
    }

    #[test]
    fn frames_roundtrip_with_padding() {
        let bytes = encrypt(&[(b"hello", 10, false), (b"", 0, false), (b"world", 0, true)], 3);
        let mut decrypter = decrypter(bytes, 3);
        let mut buf = [0u8; MAX_PAYLOAD_LENGTH];

        let frame = decrypter.read_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..frame.length], b"hello");
        assert!(!frame.final_frame);

        let frame = decrypter.read_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.length, 0);

        let frame = decrypter.read_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..frame.length], b"world");
        assert!(frame.final_frame);

        assert_eq!(decrypter.read_frame(&mut buf).unwrap(), None);
    }

    #[test]
    fn wire_length_matches_layout() {
        let bytes = encrypt(&[(b"abc", 5, true)], 0);
        assert_eq!(bytes.len(), STREAM_HEADER_LENGTH + FRAME_HEADER_LENGTH + 3 + 5 + MAC_LENGTH);
    }

    #[test]
    fn tag_precedes_stream_header() {
        let mut encrypter = StreamEncrypter::new(
            Vec::new(),
            Some([0xEE; 16]),
            SecretKey::from_bytes(HEADER_KEY),
            0,
            NONCE,
            FRAME_KEY,
        );
        encrypter.write_frame(b"", 0, true).unwrap();
        let bytes = encrypter.into_inner();

        assert_eq!(&bytes[..16], &[0xEE; 16]);
        assert_eq!(&bytes[16..40], &NONCE);
    }

    #[test]
    fn stream_number_mismatch_rejected() {
        let bytes = encrypt(&[(b"x", 0, true)], 5);
        let mut decrypter = decrypter(bytes, 6);
        let mut buf = [0u8; MAX_PAYLOAD_LENGTH];

        let err = decrypter.read_frame(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn tampered_frame_rejected() {
        let mut bytes = encrypt(&[(b"payload", 0, true)], 1);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let mut decrypter = decrypter(bytes, 1);
        let mut buf = [0u8; MAX_PAYLOAD_LENGTH];
        assert!(decrypter.read_frame(&mut buf).is_err());
    }

    #[test]
    fn wrong_header_key_rejected() {
        let bytes = encrypt(&[(b"payload", 0, true)], 1);
        let mut decrypter =
            StreamDecrypter::new(Cursor::new(bytes), SecretKey::from_bytes([0; 32]), 1);
        let mut buf = [0u8; MAX_PAYLOAD_LENGTH];
        assert!(decrypter.read_frame(&mut buf).is_err());
    }

    #[test]
    fn truncation_before_final_frame_is_unexpected_eof() {
        let bytes = encrypt(&[(b"one", 0, false)], 1);
        let mut decrypter = decrypter(bytes, 1);
        let mut buf = [0u8; MAX_PAYLOAD_LENGTH];

        assert!(decrypter.read_frame(&mut buf).unwrap().is_some());
        let err = decrypter.read_frame(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn nothing_read_after_final_frame() {
        let mut bytes = encrypt(&[(b"done", 0, true)], 1);
        bytes.extend_from_slice(b"trailing garbage");

        let mut decrypter = decrypter(bytes, 1);
        let mut buf = [0u8; MAX_PAYLOAD_LENGTH];
        assert!(decrypter.read_frame(&mut buf).unwrap().is_some());
        assert_eq!(decrypter.read_frame(&mut buf).unwrap(), None);

        let rest = decrypter.into_inner();
        assert_eq!(&rest.get_ref()[rest.position() as usize..], b"trailing garbage");
    }

    #[test]
    fn write_after_final_frame_fails() {
        let mut encrypter = StreamEncrypter::new(
            Vec::new(),
            None,
            SecretKey::from_bytes(HEADER_KEY),
            0,
            NONCE,
            FRAME_KEY,
        );
        encrypter.write_frame(b"", 0, true).unwrap();
        assert!(encrypter.write_frame(b"more", 0, false).is_err());
    }
}
