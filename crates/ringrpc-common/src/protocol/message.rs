use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{Result, RingrpcError};
use super::requests::CallEnvelope;
use super::responses::ResultEnvelope;

static SEQUENCE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Next wire-level sequence number. Wraps around after `u32::MAX`.
pub fn next_sequence() -> u32 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Kind of frame carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    HeartbeatPing = 2,
    HeartbeatPong = 3,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::HeartbeatPing),
            3 => Ok(MessageType::HeartbeatPong),
            other => Err(RingrpcError::Protocol(format!("Unknown message type: {}", other))),
        }
    }

    pub fn is_heartbeat(self) -> bool {
        matches!(self, MessageType::HeartbeatPing | MessageType::HeartbeatPong)
    }
}

/// Payload of a wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Call(CallEnvelope),
    Result(ResultEnvelope),
    Ping,
    Pong,
}

/// Transport envelope: one frame on the wire.
///
/// The header fields select how the body is transformed: `codec` picks the
/// serializer and `compress` the compressor used for call and result bodies.
/// Heartbeats carry a fixed marker and are neither serialized nor compressed.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// Serialization codec id
    pub codec: u8,
    /// Compression codec id
    pub compress: u8,
    /// Wire sequence number; responses echo the request's value
    pub request_id: u32,
    pub body: MessageBody,
}

impl WireMessage {
    pub fn request(codec: u8, compress: u8, call: CallEnvelope) -> Self {
        WireMessage {
            codec,
            compress,
            request_id: next_sequence(),
            body: MessageBody::Call(call),
        }
    }

    /// Builds the response frame for the request frame numbered `request_id`.
    pub fn response(codec: u8, compress: u8, request_id: u32, result: ResultEnvelope) -> Self {
        WireMessage {
            codec,
            compress,
            request_id,
            body: MessageBody::Result(result),
        }
    }

    pub fn ping(codec: u8, compress: u8) -> Self {
        WireMessage {
            codec,
            compress,
            request_id: next_sequence(),
            body: MessageBody::Ping,
        }
    }

    pub fn pong(codec: u8, compress: u8, request_id: u32) -> Self {
        WireMessage {
            codec,
            compress,
            request_id,
            body: MessageBody::Pong,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self.body {
            MessageBody::Call(_) => MessageType::Request,
            MessageBody::Result(_) => MessageType::Response,
            MessageBody::Ping => MessageType::HeartbeatPing,
            MessageBody::Pong => MessageType::HeartbeatPong,
        }
    }
}
