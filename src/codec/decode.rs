//! MQTT 3.1.1 packet decoder

use bytes::Bytes;

use super::{read_binary, read_string, read_u16, read_variable_int, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, Publish, QoS, SubAck, Subscribe,
    SubscribeFilter, Unsubscribe, Will,
};

/// Decodes MQTT 3.1.1 control packets from an accumulator buffer.
///
/// `decode` is synchronous over an in-memory byte slice: the connection
/// read loop appends socket bytes to a growable buffer and calls `decode`
/// repeatedly, consuming one complete packet per successful call and
/// returning `Ok(None)` when the buffer doesn't yet hold a full packet.
pub struct Decoder {
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Try to decode one packet from `buf`. Returns `(packet, bytes_consumed)`
    /// on success, `None` if more bytes are needed.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PayloadTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload_start = 1 + len_bytes;
        let payload = &buf[payload_start..total_len];

        let packet = match packet_type {
            1 => decode_connect(payload)?,
            2 => decode_connack(flags, payload)?,
            3 => decode_publish(flags, payload, remaining_length as usize)?,
            8 => decode_subscribe(flags, payload)?,
            9 => decode_suback(payload)?,
            10 => decode_unsubscribe(flags, payload)?,
            11 => decode_unsuback(payload)?,
            12 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlagsForType(packet_type, flags));
                }
                Packet::PingReq
            }
            13 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlagsForType(packet_type, flags));
                }
                Packet::PingResp
            }
            14 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlagsForType(packet_type, flags));
                }
                Packet::Disconnect
            }
            _ => return Err(DecodeError::UnknownPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }
}

fn decode_connect(payload: &[u8]) -> Result<Packet, DecodeError> {
    let mut pos = 0;

    let (_protocol_name, len) = read_string(payload)?;
    pos += len;

    if pos >= payload.len() {
        return Err(DecodeError::Truncated);
    }
    let protocol_level = payload[pos];
    pos += 1;
    // Level support (3/4) is a session-state-machine decision, not a framing
    // error: an unsupported level still yields a well-formed CONNECT so
    // `handle_connect` can respond with CONNACK(return_code != 0) before
    // closing, per the session state machine.

    if pos >= payload.len() {
        return Err(DecodeError::Truncated);
    }
    let connect_flags = payload[pos];
    pos += 1;

    if (connect_flags & 0x01) != 0 {
        return Err(DecodeError::MalformedLength);
    }

    let clean_session = (connect_flags & 0x02) != 0;
    let will_flag = (connect_flags & 0x04) != 0;
    let will_qos = (connect_flags >> 3) & 0x03;
    let will_retain = (connect_flags & 0x20) != 0;
    let password_flag = (connect_flags & 0x40) != 0;
    let username_flag = (connect_flags & 0x80) != 0;

    if !username_flag && password_flag {
        return Err(DecodeError::Truncated);
    }
    if !will_flag && (will_qos != 0 || will_retain) {
        return Err(DecodeError::Truncated);
    }
    let will_qos = QoS::from_u8(will_qos).ok_or(DecodeError::Truncated)?;

    if pos + 2 > payload.len() {
        return Err(DecodeError::Truncated);
    }
    let keep_alive = read_u16(&payload[pos..])?;
    pos += 2;

    let (client_id, len) = read_string(&payload[pos..])?;
    let client_id = client_id.to_string();
    pos += len;

    let will = if will_flag {
        let (will_topic, len) = read_string(&payload[pos..])?;
        let will_topic = will_topic.to_string();
        pos += len;

        let (will_payload, len) = read_binary(&payload[pos..])?;
        let will_payload = Bytes::copy_from_slice(will_payload);
        pos += len;

        Some(Will {
            topic: will_topic,
            payload: will_payload,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        let (u, len) = read_string(&payload[pos..])?;
        let u = u.to_string();
        pos += len;
        Some(u)
    } else {
        None
    };

    let password = if password_flag {
        let (p, len) = read_binary(&payload[pos..])?;
        let p = Bytes::copy_from_slice(p);
        pos += len;
        Some(p)
    } else {
        None
    };
    let _ = pos;

    Ok(Packet::Connect(Box::new(Connect {
        protocol_level,
        client_id,
        clean_session,
        keep_alive,
        username,
        password,
        will,
    })))
}

fn decode_connack(_flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::Truncated);
    }
    let session_present = (payload[0] & 0x01) != 0;
    let return_code = match payload[1] {
        0 => ConnectReturnCode::Accepted,
        1 => ConnectReturnCode::UnacceptableProtocolVersion,
        2 => ConnectReturnCode::IdentifierRejected,
        3 => ConnectReturnCode::ServerUnavailable,
        4 => ConnectReturnCode::BadCredentials,
        5 => ConnectReturnCode::NotAuthorized,
        _ => return Err(DecodeError::Truncated),
    };
    Ok(Packet::ConnAck(ConnAck {
        session_present,
        return_code,
    }))
}

fn decode_publish(flags: u8, payload: &[u8], remaining_length: usize) -> Result<Packet, DecodeError> {
    let dup = (flags & 0x08) != 0;
    let qos_bits = (flags >> 1) & 0x03;
    let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidFlagsForType(3, flags))?;
    let retain = (flags & 0x01) != 0;

    let (topic, topic_len) = read_string(payload)?;
    if topic.contains('+') || topic.contains('#') {
        return Err(DecodeError::MalformedString);
    }
    let topic: std::sync::Arc<str> = std::sync::Arc::from(topic);

    let mut pos = topic_len;
    let packet_id = if qos != QoS::AtMostOnce {
        let pid = read_u16(&payload[pos..])?;
        pos += 2;
        Some(pid)
    } else {
        None
    };

    // remaining_length - (2 + topic_len_in_bytes) - (qos>0 ? 2 : 0)
    let header_consumed = pos;
    if remaining_length < header_consumed {
        return Err(DecodeError::Truncated);
    }
    let payload_len = remaining_length - header_consumed;
    if payload.len() < pos + payload_len {
        return Err(DecodeError::Truncated);
    }
    let body = Bytes::copy_from_slice(&payload[pos..pos + payload_len]);

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload: body,
    }))
}

fn decode_subscribe(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0x02 {
        return Err(DecodeError::InvalidFlagsForType(8, flags));
    }
    let packet_id = read_u16(payload)?;
    let mut pos = 2;

    let mut filters = Vec::new();
    while pos < payload.len() {
        let (filter, len) = read_string(&payload[pos..])?;
        let filter = filter.to_string();
        pos += len;

        if pos >= payload.len() {
            return Err(DecodeError::Truncated);
        }
        let options_byte = payload[pos];
        pos += 1;
        let requested_qos =
            QoS::from_u8(options_byte & 0x03).ok_or(DecodeError::InvalidFlagsForType(8, options_byte))?;

        filters.push(SubscribeFilter {
            filter,
            requested_qos,
        });
    }

    if filters.is_empty() {
        return Err(DecodeError::Truncated);
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
}

fn decode_suback(payload: &[u8]) -> Result<Packet, DecodeError> {
    if payload.len() < 3 {
        return Err(DecodeError::Truncated);
    }
    let packet_id = read_u16(payload)?;
    let return_codes = payload[2..].to_vec();
    Ok(Packet::SubAck(SubAck {
        packet_id,
        return_codes,
    }))
}

fn decode_unsubscribe(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0x02 {
        return Err(DecodeError::InvalidFlagsForType(10, flags));
    }
    let packet_id = read_u16(payload)?;
    let mut pos = 2;

    let mut filters = Vec::new();
    while pos < payload.len() {
        let (filter, len) = read_string(&payload[pos..])?;
        filters.push(filter.to_string());
        pos += len;
    }

    if filters.is_empty() {
        return Err(DecodeError::Truncated);
    }

    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, filters }))
}

fn decode_unsuback(payload: &[u8]) -> Result<Packet, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::Truncated);
    }
    let packet_id = read_u16(payload)?;
    Ok(Packet::UnsubAck(crate::protocol::UnsubAck { packet_id }))
}
