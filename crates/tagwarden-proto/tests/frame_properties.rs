//! Property-based tests for frame header layouts
//!
//! Every header the builder accepts must parse back to the same lengths and
//! flag, and every 4-byte input must either parse into a header that fits one
//! frame or be rejected.

use proptest::prelude::*;
use tagwarden_proto::{FrameHeader, MAX_PAYLOAD_LENGTH, ProtocolError};

/// Strategy for (payload, padding) pairs that fit in one frame
fn fitting_lengths() -> impl Strategy<Value = (usize, usize)> {
    (0..=MAX_PAYLOAD_LENGTH).prop_flat_map(|payload| (Just(payload), 0..=MAX_PAYLOAD_LENGTH - payload))
}

#[test]
fn prop_frame_header_preserves_fields() {
    proptest!(|((payload, padding) in fitting_lengths(), final_frame in any::<bool>())| {
        let header = FrameHeader::new(payload, padding, final_frame).expect("lengths fit");
        let parsed = FrameHeader::parse(&header.to_bytes()).expect("built header must parse");

        prop_assert_eq!(parsed.payload_length(), payload);
        prop_assert_eq!(parsed.padding_length(), padding);
        prop_assert_eq!(parsed.is_final(), final_frame);
    });
}

#[test]
fn prop_parsed_header_always_fits_one_frame() {
    proptest!(|(bytes in any::<[u8; 4]>())| {
        match FrameHeader::parse(&bytes) {
            Ok(header) => {
                prop_assert!(header.payload_length() + header.padding_length() <= MAX_PAYLOAD_LENGTH);
            },
            Err(e) => {
                let is_too_large = matches!(e, ProtocolError::FrameTooLarge { .. });
                prop_assert!(is_too_large);
            },
        }
    });
}
