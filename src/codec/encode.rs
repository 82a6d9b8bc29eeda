//! MQTT 3.1.1 packet encoder

use bytes::{BufMut, BytesMut};

use super::{variable_int_len, write_string, write_variable_int};
use crate::protocol::{ConnAck, EncodeError, Packet, Publish, SubAck, UnsubAck};

/// Encodes MQTT 3.1.1 control packets into a `BytesMut` buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode `packet` by appending fixed header + variable header + payload
    /// bytes to `buf`.
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(_) => unreachable!("server never sends CONNECT"),
            Packet::ConnAck(p) => encode_connack(p, buf),
            Packet::Publish(p) => encode_publish(p, buf),
            Packet::Subscribe(_) => unreachable!("server never sends SUBSCRIBE"),
            Packet::SubAck(p) => encode_suback(p, buf),
            Packet::Unsubscribe(_) => unreachable!("server never sends UNSUBSCRIBE"),
            Packet::UnsubAck(p) => encode_unsuback(p, buf),
            Packet::PingReq => {
                buf.put_u8(0xC0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::PingResp => {
                buf.put_u8(0xD0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::Disconnect => {
                buf.put_u8(0xE0);
                buf.put_u8(0x00);
                Ok(())
            }
        }
    }
}

fn encode_connack(packet: &ConnAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    buf.put_u8(0x20);
    write_variable_int(buf, 2)?;
    buf.put_u8(if packet.session_present { 0x01 } else { 0x00 });
    buf.put_u8(packet.return_code.as_u8());
    Ok(())
}

fn encode_publish(packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let mut remaining_length = 2 + packet.topic.len();
    if packet.packet_id.is_some() {
        remaining_length += 2;
    }
    remaining_length += packet.payload.len();
    if remaining_length > super::MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge);
    }

    let mut first_byte: u8 = 0x30;
    if packet.dup {
        first_byte |= 0x08;
    }
    first_byte |= packet.qos.as_u8() << 1;
    if packet.retain {
        first_byte |= 0x01;
    }
    buf.put_u8(first_byte);
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, &packet.topic)?;
    if let Some(packet_id) = packet.packet_id {
        buf.put_u16(packet_id);
    }
    buf.put_slice(&packet.payload);

    Ok(())
}

fn encode_suback(packet: &SubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let remaining_length = 2 + packet.return_codes.len();
    buf.put_u8(0x90);
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);
    buf.put_slice(&packet.return_codes);
    Ok(())
}

fn encode_unsuback(packet: &UnsubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
    buf.put_u8(0xB0);
    write_variable_int(buf, 2)?;
    buf.put_u16(packet.packet_id);
    Ok(())
}

/// Number of bytes `Encoder::encode` would write for a PUBLISH with the
/// given topic/payload lengths, without allocating.
pub fn publish_encoded_len(topic_len: usize, payload_len: usize, has_packet_id: bool) -> usize {
    let mut remaining_length = 2 + topic_len;
    if has_packet_id {
        remaining_length += 2;
    }
    remaining_length += payload_len;
    1 + variable_int_len(remaining_length as u32) + remaining_length
}
