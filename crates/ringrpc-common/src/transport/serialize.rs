use crate::protocol::error::{Result, RingrpcError};
use crate::protocol::{CallEnvelope, ResultEnvelope};

/// Serialization codec ids carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SerializationKind {
    Json = 0x01,
    MessagePack = 0x02,
}

impl SerializationKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(SerializationKind::Json),
            0x02 => Ok(SerializationKind::MessagePack),
            other => Err(RingrpcError::Protocol(format!(
                "Unknown serialization codec id: {}",
                other
            ))),
        }
    }

    /// Extension name the serializer is registered under.
    pub fn name(self) -> &'static str {
        match self {
            SerializationKind::Json => "json",
            SerializationKind::MessagePack => "msgpack",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(SerializationKind::Json),
            "msgpack" => Ok(SerializationKind::MessagePack),
            other => Err(RingrpcError::Extension(format!("serializer '{}'", other))),
        }
    }
}

/// Turns envelopes into bytes and back.
///
/// Implementations must be stateless or internally synchronized: one
/// instance is shared by every connection and worker of a process.
pub trait Serializer: Send + Sync {
    fn kind(&self) -> SerializationKind;

    fn serialize_call(&self, call: &CallEnvelope) -> Result<Vec<u8>>;

    fn deserialize_call(&self, data: &[u8]) -> Result<CallEnvelope>;

    fn serialize_result(&self, result: &ResultEnvelope) -> Result<Vec<u8>>;

    fn deserialize_result(&self, data: &[u8]) -> Result<ResultEnvelope>;
}

/// JSON serializer backed by `serde_json`.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn kind(&self) -> SerializationKind {
        SerializationKind::Json
    }

    fn serialize_call(&self, call: &CallEnvelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(call)?)
    }

    fn deserialize_call(&self, data: &[u8]) -> Result<CallEnvelope> {
        Ok(serde_json::from_slice(data)?)
    }

    fn serialize_result(&self, result: &ResultEnvelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(result)?)
    }

    fn deserialize_result(&self, data: &[u8]) -> Result<ResultEnvelope> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// MessagePack serializer backed by `rmp-serde`.
///
/// Structs are written as maps so that parameter values (`serde_json::Value`)
/// survive the round trip.
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn kind(&self) -> SerializationKind {
        SerializationKind::MessagePack
    }

    fn serialize_call(&self, call: &CallEnvelope) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(call)?)
    }

    fn deserialize_call(&self, data: &[u8]) -> Result<CallEnvelope> {
        Ok(rmp_serde::from_slice(data)?)
    }

    fn serialize_result(&self, result: &ResultEnvelope) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(result)?)
    }

    fn deserialize_result(&self, data: &[u8]) -> Result<ResultEnvelope> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
