use std::io::{self, Read};

use tagwarden_crypto::FrameDecrypter;
use tagwarden_proto::MAX_PAYLOAD_LENGTH;

/// Byte-oriented reader over a [`FrameDecrypter`].
///
/// Pulls one frame at a time. Empty frames are skipped. The stream ends
/// after the final frame has been drained or when the decrypter runs out of
/// frames; after that the decrypter is never called again.
pub struct StreamReader<D: FrameDecrypter> {
    decrypter: D,
    payload: Box<[u8]>,
    offset: usize,
    length: usize,
    /// Final frame seen or decrypter exhausted
    ended: bool,
}

impl<D: FrameDecrypter> StreamReader<D> {
    /// Wrap `decrypter`.
    pub fn new(decrypter: D) -> Self {
        Self {
            decrypter,
            payload: vec![0; MAX_PAYLOAD_LENGTH].into_boxed_slice(),
            offset: 0,
            length: 0,
            ended: false,
        }
    }

    /// Consume the reader, returning the decrypter.
    pub fn into_inner(self) -> D {
        self.decrypter
    }

    /// Fill the buffer with the next non-empty frame.
    ///
    /// Returns false at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        debug_assert_eq!(self.length, 0);
        while !self.ended {
            match self.decrypter.read_frame(&mut self.payload)? {
                Some(frame) => {
                    self.ended = frame.final_frame;
                    if frame.length > 0 {
                        self.offset = 0;
                        self.length = frame.length;
                        return Ok(true);
                    }
                },
                None => self.ended = true,
            }
        }
        Ok(false)
    }
}

impl<D: FrameDecrypter> Read for StreamReader<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.length == 0 && !self.fill()? {
            return Ok(0);
        }

        let n = buf.len().min(self.length);
        buf[..n].copy_from_slice(&self.payload[self.offset..self.offset + n]);
        self.offset += n;
        self.length -= n;
        Ok(n)
    }
}
