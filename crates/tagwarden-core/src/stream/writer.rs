use std::io::{self, Write};

use tagwarden_crypto::FrameEncrypter;
use tagwarden_proto::MAX_PAYLOAD_LENGTH;

/// Byte-oriented writer over a [`FrameEncrypter`].
///
/// Bytes are buffered until a full frame's worth has accumulated. `flush()`
/// pushes out whatever is buffered as a (possibly empty) frame;
/// [`close`](Self::close) ends the stream with exactly one final frame.
/// Dropping the writer without closing emits nothing further, leaving the
/// stream truncated for the reader.
pub struct StreamWriter<E: FrameEncrypter> {
    encrypter: E,
    payload: Vec<u8>,
}

impl<E: FrameEncrypter> StreamWriter<E> {
    /// Wrap `encrypter`.
    pub fn new(encrypter: E) -> Self {
        Self { encrypter, payload: Vec::with_capacity(MAX_PAYLOAD_LENGTH) }
    }

    /// Bytes buffered but not yet written out.
    pub fn buffered(&self) -> usize {
        self.payload.len()
    }

    /// Write buffered bytes as the final frame and flush.
    ///
    /// Returns the encrypter so the caller can recover the sink.
    pub fn close(mut self) -> io::Result<E> {
        self.write_frame(true)?;
        self.encrypter.flush()?;
        Ok(self.encrypter)
    }

    /// Abandon the stream without a final frame, discarding buffered bytes.
    pub fn into_encrypter(self) -> E {
        self.encrypter
    }

    fn write_frame(&mut self, final_frame: bool) -> io::Result<()> {
        self.encrypter.write_frame(&self.payload, 0, final_frame)?;
        self.payload.clear();
        Ok(())
    }
}

impl<E: FrameEncrypter> Write for StreamWriter<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let available = MAX_PAYLOAD_LENGTH - self.payload.len();
            let (chunk, tail) = rest.split_at(available.min(rest.len()));
            self.payload.extend_from_slice(chunk);
            rest = tail;

            if self.payload.len() == MAX_PAYLOAD_LENGTH {
                self.write_frame(false)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_frame(false)?;
        self.encrypter.flush()
    }
}
