//! Property-based tests for the stream framer
//!
//! Whatever sequence of writes and flushes produced a stream, reading it back
//! through the real codec yields exactly the bytes written.

mod common;

use std::io::{Cursor, Read, Write};

use common::{ManualEnv, contact, root_key, tcp, time_in_period};
use proptest::prelude::*;
use tagwarden_core::{StreamContext, create_incoming_stream, create_outgoing_stream};
use tagwarden_crypto::HkdfTransportCrypto;
use tagwarden_proto::{MAX_PAYLOAD_LENGTH, TAG_LENGTH};

#[derive(Debug, Clone)]
enum Action {
    Write(Vec<u8>),
    Flush,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 0..2 * MAX_PAYLOAD_LENGTH).prop_map(Action::Write),
        1 => Just(Action::Flush),
    ]
}

fn context(stream_number: u32) -> StreamContext {
    StreamContext {
        owner: contact(1),
        transport_id: tcp(),
        tag_key: root_key(1),
        header_key: root_key(2),
        stream_number,
        handshake_mode: false,
    }
}

#[test]
fn prop_stream_roundtrip_preserves_bytes() {
    proptest!(ProptestConfig::with_cases(64), |(
        actions in prop::collection::vec(action(), 0..12),
        stream_number in any::<u32>(),
    )| {
        let env = ManualEnv::new(time_in_period(1, 0));
        let ctx = context(stream_number);

        let mut writer = create_outgoing_stream(&ctx, &HkdfTransportCrypto, &env, Vec::new());
        let mut expected = Vec::new();
        for action in &actions {
            match action {
                Action::Write(bytes) => {
                    writer.write_all(bytes).unwrap();
                    expected.extend_from_slice(bytes);
                },
                Action::Flush => writer.flush().unwrap(),
            }
        }
        let wire = writer.close().unwrap().into_inner();

        let mut source = Cursor::new(wire);
        let mut tag = [0u8; TAG_LENGTH];
        source.read_exact(&mut tag).unwrap();

        let mut reader = create_incoming_stream(&ctx, source);
        let mut actual = Vec::new();
        reader.read_to_end(&mut actual).unwrap();
        prop_assert_eq!(actual, expected);
    });
}
