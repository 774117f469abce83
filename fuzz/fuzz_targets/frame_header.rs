//! Fuzz target for FrameHeader::parse
//!
//! Arbitrary bytes must either parse into a header whose payload and padding
//! fit one frame, or be rejected. The parser should NEVER panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagwarden_proto::{FrameHeader, MAX_PAYLOAD_LENGTH};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = FrameHeader::parse(data) {
        assert!(header.payload_length() + header.padding_length() <= MAX_PAYLOAD_LENGTH);
    }
});
