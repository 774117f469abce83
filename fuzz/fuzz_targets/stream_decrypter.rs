//! Fuzz target for the incoming stream path
//!
//! Feeds arbitrary bytes to a StreamReader over a StreamDecrypter, as if
//! they followed a recognised tag on the wire.
//!
//! The reader should NEVER panic: forged headers, truncated frames and bad
//! padding must all surface as I/O errors.

#![no_main]

use std::io::{Cursor, Read};

use libfuzzer_sys::fuzz_target;
use tagwarden_core::StreamReader;
use tagwarden_crypto::{SecretKey, StreamDecrypter};

fuzz_target!(|data: &[u8]| {
    let decrypter =
        StreamDecrypter::new(Cursor::new(data.to_vec()), SecretKey::from_bytes([0x21; 32]), 0);
    let mut reader = StreamReader::new(decrypter);

    let mut out = Vec::new();
    let _ = reader.read_to_end(&mut out);
});
