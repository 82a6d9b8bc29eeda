//! Protocol error types

use std::fmt;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer yet (caller should wait for more bytes)
    InsufficientData,
    /// Unrecognized control packet type nibble
    UnknownPacketType(u8),
    /// Flags bits don't match what's allowed for this packet type
    InvalidFlagsForType(u8, u8),
    /// Remaining-length varint used a 5th continuation byte
    MalformedLength,
    /// Remaining length decodes to a value above the 4-byte varint ceiling
    RemainingLengthTooLarge,
    /// A length-prefixed string was truncated or not valid UTF-8
    MalformedString,
    /// Packet ended before all the fields the type requires were read
    Truncated,
    /// remaining_length (or a derived field length) exceeds the configured limit
    PayloadTooLarge,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::UnknownPacketType(t) => write!(f, "unknown packet type: {}", t),
            Self::InvalidFlagsForType(t, flags) => {
                write!(f, "invalid flags 0x{:X} for packet type {}", flags, t)
            }
            Self::MalformedLength => write!(f, "malformed remaining length"),
            Self::RemainingLengthTooLarge => write!(f, "remaining length exceeds maximum"),
            Self::MalformedString => write!(f, "malformed length-prefixed string"),
            Self::Truncated => write!(f, "packet truncated"),
            Self::PayloadTooLarge => write!(f, "payload exceeds maximum packet size"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// String exceeds the 65535-byte length-prefix limit
    StringTooLong,
    /// Encoded remaining_length exceeds the varint ceiling
    PacketTooLarge,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StringTooLong => write!(f, "string too long"),
            Self::PacketTooLarge => write!(f, "packet too large"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// High-level protocol errors: decode/encode failures plus state violations
/// that aren't about malformed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Decode(DecodeError),
    Encode(EncodeError),
    /// A packet type arrived that isn't valid for the session's current state
    ProtocolViolation(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        ProtocolError::Decode(e)
    }
}

impl From<EncodeError> for ProtocolError {
    fn from(e: EncodeError) -> Self {
        ProtocolError::Encode(e)
    }
}
