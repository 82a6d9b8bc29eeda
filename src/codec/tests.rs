//! Codec round-trip and wire-format tests

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use test_case::test_case;

use crate::codec::{read_variable_int, variable_int_len, write_variable_int, Decoder, Encoder};
use crate::protocol::{
    ConnAck, ConnectReturnCode, DecodeError, Packet, Publish, QoS, SubAck, SubscribeFilter,
    Subscribe, Unsubscribe, UnsubAck,
};

fn encode_packet(packet: &Packet) -> BytesMut {
    let encoder = Encoder::new();
    let mut buf = BytesMut::new();
    encoder.encode(packet, &mut buf).unwrap();
    buf
}

fn decode_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    let decoder = Decoder::new();
    match decoder.decode(buf)? {
        Some((packet, _)) => Ok(packet),
        None => Err(DecodeError::InsufficientData),
    }
}

// ---------------------------------------------------------------------------
// Remaining-length varint
// ---------------------------------------------------------------------------

#[test_case(0, 1)]
#[test_case(127, 1)]
#[test_case(128, 2)]
#[test_case(16_383, 2)]
#[test_case(16_384, 3)]
#[test_case(2_097_151, 3)]
#[test_case(2_097_152, 4)]
#[test_case(268_435_455, 4)]
fn varint_round_trips_with_expected_width(value: u32, expected_width: usize) {
    let mut buf = BytesMut::new();
    let written = write_variable_int(&mut buf, value).unwrap();
    assert_eq!(written, expected_width);
    assert_eq!(variable_int_len(value), expected_width);

    let (decoded, consumed) = read_variable_int(&buf).unwrap();
    assert_eq!(decoded, value);
    assert_eq!(consumed, expected_width);
}

#[test]
fn varint_over_max_is_rejected() {
    let mut buf = BytesMut::new();
    assert!(write_variable_int(&mut buf, 268_435_456).is_err());
}

#[test]
fn varint_fifth_continuation_byte_is_malformed() {
    let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
    assert_eq!(
        read_variable_int(&buf).unwrap_err(),
        DecodeError::MalformedLength
    );
}

#[test]
fn varint_truncated_mid_sequence_waits_for_more_data() {
    let buf = [0x80];
    assert_eq!(
        read_variable_int(&buf).unwrap_err(),
        DecodeError::InsufficientData
    );
}

// ---------------------------------------------------------------------------
// Packet round trips
// ---------------------------------------------------------------------------

#[test]
fn connack_round_trips() {
    let packet = Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: ConnectReturnCode::Accepted,
    });
    let encoded = encode_packet(&packet);
    assert_eq!(encoded.as_ref(), [0x20, 0x02, 0x00, 0x00]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn connack_always_reports_session_present_false() {
    let packet = Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: ConnectReturnCode::IdentifierRejected,
    });
    let encoded = encode_packet(&packet);
    assert_eq!(encoded[2], 0x00);
    assert_eq!(encoded[3], 0x02);
}

#[test]
fn publish_qos0_round_trips() {
    let packet = Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtMostOnce,
        retain: false,
        topic: std::sync::Arc::from("sensor/temp"),
        packet_id: None,
        payload: Bytes::from("23.5"),
    });
    let encoded = encode_packet(&packet);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn publish_retain_and_dup_flags_round_trip() {
    let packet = Packet::Publish(Publish {
        dup: true,
        qos: QoS::AtMostOnce,
        retain: true,
        topic: std::sync::Arc::from("a/b"),
        packet_id: None,
        payload: Bytes::new(),
    });
    let encoded = encode_packet(&packet);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn publish_payload_length_derives_from_remaining_length() {
    // remaining_length = 2 (topic len prefix) + 3 (topic) + payload
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x30]); // PUBLISH, qos0, no dup/retain
    write_variable_int(&mut buf, 2 + 3 + 5).unwrap();
    buf.extend_from_slice(&[0x00, 0x03]); // topic len = 3
    buf.extend_from_slice(b"a/b");
    buf.extend_from_slice(b"hello");

    let decoded = decode_packet(&buf).unwrap();
    match decoded {
        Packet::Publish(p) => {
            assert_eq!(p.topic.as_ref(), "a/b");
            assert_eq!(p.payload.as_ref(), b"hello");
        }
        _ => panic!("expected PUBLISH"),
    }
}

#[test]
fn subscribe_round_trips_and_suback_always_grants_qos0() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 42,
        filters: vec![
            SubscribeFilter {
                filter: "sensor/#".to_string(),
                requested_qos: QoS::ExactlyOnce,
            },
            SubscribeFilter {
                filter: "a/+/c".to_string(),
                requested_qos: QoS::AtLeastOnce,
            },
        ],
    });
    // SUBSCRIBE is client->server only; exercise decode of a hand-rolled wire form.
    let encoded_manually = {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82]);
        let mut body = BytesMut::new();
        body.extend_from_slice(&42u16.to_be_bytes());
        for f in &[("sensor/#", 2u8), ("a/+/c", 1u8)] {
            body.extend_from_slice(&(f.0.len() as u16).to_be_bytes());
            body.extend_from_slice(f.0.as_bytes());
            body.extend_from_slice(&[f.1]);
        }
        write_variable_int(&mut buf, body.len() as u32).unwrap();
        buf.extend_from_slice(&body);
        buf
    };
    assert_eq!(decode_packet(&encoded_manually).unwrap(), packet);

    let suback = Packet::SubAck(SubAck {
        packet_id: 42,
        return_codes: vec![0, 0],
    });
    let encoded = encode_packet(&suback);
    assert_eq!(decode_packet(&encoded).unwrap(), suback);
    assert!(encoded[4..].iter().all(|&c| c == 0));
}

#[test]
fn unsubscribe_and_unsuback_round_trip() {
    let unsuback = Packet::UnsubAck(UnsubAck { packet_id: 7 });
    let encoded = encode_packet(&unsuback);
    assert_eq!(encoded.as_ref(), [0xB0, 0x02, 0x00, 0x07]);
    assert_eq!(decode_packet(&encoded).unwrap(), unsuback);

    // UNSUBSCRIBE is client->server only; decode a hand-rolled form.
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0xA2]);
    let mut body = BytesMut::new();
    body.extend_from_slice(&7u16.to_be_bytes());
    body.extend_from_slice(&5u16.to_be_bytes());
    body.extend_from_slice(b"a/b/c");
    write_variable_int(&mut buf, body.len() as u32).unwrap();
    buf.extend_from_slice(&body);

    match decode_packet(&buf).unwrap() {
        Packet::Unsubscribe(u) => {
            assert_eq!(u.packet_id, 7);
            assert_eq!(u.filters, vec!["a/b/c".to_string()]);
        }
        _ => panic!("expected UNSUBSCRIBE"),
    }
}

#[test]
fn pingreq_encodes_to_fixed_bytes() {
    let encoded = encode_packet(&Packet::PingReq);
    assert_eq!(encoded.as_ref(), [0xC0, 0x00]);
}

#[test]
fn pingresp_decodes_from_fixed_bytes() {
    let buf = [0xD0, 0x00];
    assert_eq!(decode_packet(&buf).unwrap(), Packet::PingResp);
}

#[test]
fn disconnect_round_trips() {
    let encoded = encode_packet(&Packet::Disconnect);
    assert_eq!(encoded.as_ref(), [0xE0, 0x00]);
    assert_eq!(decode_packet(&encoded).unwrap(), Packet::Disconnect);
}

// ---------------------------------------------------------------------------
// Malformed input
// ---------------------------------------------------------------------------

#[test]
fn connect_with_five_byte_varint_is_malformed() {
    let buf = [0x10, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
    assert_eq!(
        Decoder::new().decode(&buf).unwrap_err(),
        DecodeError::MalformedLength
    );
}

#[test]
fn unknown_packet_type_is_rejected() {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x00]); // type 0 is reserved/unused
    write_variable_int(&mut buf, 0).unwrap();
    assert_eq!(
        Decoder::new().decode(&buf).unwrap_err(),
        DecodeError::UnknownPacketType(0)
    );
}

#[test]
fn partial_packet_returns_none_not_error() {
    let buf = [0x30, 0x05, 0x00, 0x03, b'a', b'/'];
    assert!(Decoder::new().decode(&buf).unwrap().is_none());
}

#[test]
fn packet_exceeding_max_packet_size_is_rejected() {
    let decoder = Decoder::new().with_max_packet_size(10);
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x30]);
    write_variable_int(&mut buf, 100).unwrap();
    buf.extend_from_slice(&[0u8; 100]);
    assert_eq!(
        decoder.decode(&buf).unwrap_err(),
        DecodeError::PayloadTooLarge
    );
}
