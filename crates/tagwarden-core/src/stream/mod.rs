//! Stream framer.
//!
//! Adapts `std::io::Read`/`Write` to the frame-oriented encrypter and
//! decrypter in `tagwarden-crypto`. The factory functions wire a
//! [`StreamContext`] handed out by the key engine to the real
//! XChaCha20-Poly1305 stream codec.

mod reader;
mod writer;

use std::io::{Read, Write};

pub use reader::StreamReader;
use tagwarden_crypto::{StreamDecrypter, StreamEncrypter, TransportCrypto};
use tagwarden_proto::{PROTOCOL_VERSION, SECRET_KEY_LENGTH, STREAM_HEADER_NONCE_LENGTH};
pub use writer::StreamWriter;

use crate::{context::StreamContext, env::Environment};

/// Writer for a new outgoing stream.
///
/// The recognition tag for `ctx.stream_number` goes out first, followed by
/// the stream header and frames. The header nonce and frame key are drawn
/// from `env`.
pub fn create_outgoing_stream<W, C, E>(
    ctx: &StreamContext,
    crypto: &C,
    env: &E,
    sink: W,
) -> StreamWriter<StreamEncrypter<W>>
where
    W: Write,
    C: TransportCrypto,
    E: Environment,
{
    let tag = crypto.encode_tag(&ctx.tag_key, PROTOCOL_VERSION, ctx.stream_number);

    let mut header_nonce = [0u8; STREAM_HEADER_NONCE_LENGTH];
    env.random_bytes(&mut header_nonce);
    let mut frame_key = [0u8; SECRET_KEY_LENGTH];
    env.random_bytes(&mut frame_key);

    let encrypter = StreamEncrypter::new(
        sink,
        Some(tag),
        ctx.header_key.clone(),
        u64::from(ctx.stream_number),
        header_nonce,
        frame_key,
    );
    StreamWriter::new(encrypter)
}

/// Reader for an incoming stream whose tag has already been read from
/// `source` and recognised.
pub fn create_incoming_stream<R: Read>(
    ctx: &StreamContext,
    source: R,
) -> StreamReader<StreamDecrypter<R>> {
    let decrypter =
        StreamDecrypter::new(source, ctx.header_key.clone(), u64::from(ctx.stream_number));
    StreamReader::new(decrypter)
}
