use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::extension::ExtensionLoader;
use crate::protocol::error::{Result, RingrpcError};
use crate::protocol::{MessageBody, MessageType, WireMessage};
use crate::transport::compress::{CompressionKind, Compressor, GzipCompressor, IdentityCompressor};
use crate::transport::serialize::{
    JsonSerializer, MessagePackSerializer, SerializationKind, Serializer,
};

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"rrpc";

/// Protocol version written into every frame.
pub const VERSION: u8 = 1;

/// Bytes preceding the body: magic, version, type, codec, compress, request
/// id and body length.
pub const HEADER_LEN: usize = 16;

pub const PING_BODY: &[u8] = b"PING";
pub const PONG_BODY: &[u8] = b"PONG";

/// Serializer and compressor tables keyed by extension name.
///
/// A header codec id is mapped to its extension name and resolved through
/// the loader, so replacing the factory registered under `"json"` changes
/// what id `0x01` decodes with.
pub struct Codecs {
    serializers: ExtensionLoader<dyn Serializer>,
    compressors: ExtensionLoader<dyn Compressor>,
}

impl Codecs {
    /// Tables with nothing registered.
    pub fn empty() -> Self {
        Self {
            serializers: ExtensionLoader::new(),
            compressors: ExtensionLoader::new(),
        }
    }

    pub fn serializers(&self) -> &ExtensionLoader<dyn Serializer> {
        &self.serializers
    }

    pub fn compressors(&self) -> &ExtensionLoader<dyn Compressor> {
        &self.compressors
    }

    pub fn serializer(&self, code: u8) -> Result<Arc<dyn Serializer>> {
        let kind = SerializationKind::from_code(code)?;
        self.serializers.get(kind.name())
    }

    pub fn compressor(&self, code: u8) -> Result<Arc<dyn Compressor>> {
        let kind = CompressionKind::from_code(code)?;
        self.compressors.get(kind.name())
    }

    /// Header ids for the named serializer and compressor.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::Extension`] if either name is unknown or has no
    /// registered implementation.
    pub fn resolve_ids(&self, serializer: &str, compressor: &str) -> Result<(u8, u8)> {
        let s = SerializationKind::from_name(serializer)?;
        let c = CompressionKind::from_name(compressor)?;
        if !self.serializers.contains(s.name()) {
            return Err(RingrpcError::Extension(format!("serializer '{}'", serializer)));
        }
        if !self.compressors.contains(c.name()) {
            return Err(RingrpcError::Extension(format!("compressor '{}'", compressor)));
        }
        Ok((s.code(), c.code()))
    }
}

impl Default for Codecs {
    /// `json`, `msgpack`, `gzip` and `none`.
    fn default() -> Self {
        let codecs = Self::empty();
        codecs
            .serializers
            .register("json", || Arc::new(JsonSerializer) as Arc<dyn Serializer>);
        codecs
            .serializers
            .register("msgpack", || Arc::new(MessagePackSerializer) as Arc<dyn Serializer>);
        codecs
            .compressors
            .register("gzip", || Arc::new(GzipCompressor::new()) as Arc<dyn Compressor>);
        codecs
            .compressors
            .register("none", || Arc::new(IdentityCompressor) as Arc<dyn Compressor>);
        codecs
    }
}

/// Length-delimited binary framing for [`WireMessage`]s.
///
/// # Wire Format
///
/// ```text
/// +-------+---------+------+-------+----------+------------+-------------+------+
/// | magic | version | type | codec | compress | request id | body length | body |
/// |  4 B  |   1 B   | 1 B  |  1 B  |   1 B    | 4 B (BE)   |  4 B (BE)   |      |
/// +-------+---------+------+-------+----------+------------+-------------+------+
/// ```
///
/// Request and response bodies are `compress(serialize(envelope))`.
/// Heartbeat bodies are the literal markers `PING` / `PONG`.
///
/// Decoding consumes nothing until a whole frame is buffered. Any header
/// field that does not validate is a [`RingrpcError::Protocol`] error, after
/// which the stream position is unknown and the connection must be closed.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use ringrpc_common::transport::{Codecs, WireCodec};
/// use ringrpc_common::WireMessage;
/// use std::sync::Arc;
///
/// let codec = WireCodec::new(Arc::new(Codecs::default()));
/// let frame = codec.encode_frame(&WireMessage::ping(1, 0)).unwrap();
///
/// let mut buf = BytesMut::from(&frame[..]);
/// let decoded = codec.decode_message(&mut buf).unwrap().unwrap();
/// assert!(decoded.message_type().is_heartbeat());
/// ```
#[derive(Clone)]
pub struct WireCodec {
    codecs: Arc<Codecs>,
    max_frame_size: usize,
}

impl WireCodec {
    pub fn new(codecs: Arc<Codecs>) -> Self {
        Self {
            codecs,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn codecs(&self) -> &Arc<Codecs> {
        &self.codecs
    }

    /// Encodes `message` into a standalone frame.
    pub fn encode_frame(&self, message: &WireMessage) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode_message(message, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Appends the frame for `message` to `dst`.
    ///
    /// # Errors
    ///
    /// Fails if the codec ids are unknown, the envelope cannot be serialized
    /// or compressed, or the body exceeds the frame size limit. Nothing is
    /// written to `dst` on failure.
    pub fn encode_message(&self, message: &WireMessage, dst: &mut BytesMut) -> Result<()> {
        let body: Vec<u8> = match &message.body {
            MessageBody::Call(call) => {
                let raw = self.codecs.serializer(message.codec)?.serialize_call(call)?;
                self.codecs.compressor(message.compress)?.compress(&raw)?
            }
            MessageBody::Result(result) => {
                let raw = self.codecs.serializer(message.codec)?.serialize_result(result)?;
                self.codecs.compressor(message.compress)?.compress(&raw)?
            }
            MessageBody::Ping => {
                self.check_ids(message.codec, message.compress)?;
                PING_BODY.to_vec()
            }
            MessageBody::Pong => {
                self.check_ids(message.codec, message.compress)?;
                PONG_BODY.to_vec()
            }
        };

        if body.len() > self.max_frame_size {
            return Err(RingrpcError::Protocol(format!(
                "Frame too large: {} bytes (max {} bytes)",
                body.len(),
                self.max_frame_size
            )));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(&MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(message.message_type().as_byte());
        dst.put_u8(message.codec);
        dst.put_u8(message.compress);
        dst.put_u32(message.request_id);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }

    /// Decodes one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds less than a complete frame; the
    /// buffered bytes are left in place for the next call.
    pub fn decode_message(&self, src: &mut BytesMut) -> Result<Option<WireMessage>> {
        if src.len() >= MAGIC.len() && src[..MAGIC.len()] != MAGIC {
            return Err(RingrpcError::Protocol(format!(
                "Bad magic: {:02x?}",
                &src[..MAGIC.len()]
            )));
        }
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let version = src[4];
        if version != VERSION {
            return Err(RingrpcError::Protocol(format!(
                "Unsupported protocol version: {}",
                version
            )));
        }
        let message_type = MessageType::from_byte(src[5])?;
        let codec = src[6];
        let compress = src[7];
        self.check_ids(codec, compress)?;

        let request_id = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);
        let body_len = u32::from_be_bytes([src[12], src[13], src[14], src[15]]) as usize;
        if body_len > self.max_frame_size {
            return Err(RingrpcError::Protocol(format!(
                "Frame too large: {} bytes (max {} bytes)",
                body_len, self.max_frame_size
            )));
        }

        if src.len() < HEADER_LEN + body_len {
            src.reserve(HEADER_LEN + body_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len);

        let body = match message_type {
            MessageType::Request => {
                let raw = self.codecs.compressor(compress)?.decompress(&body, self.max_frame_size)?;
                MessageBody::Call(self.codecs.serializer(codec)?.deserialize_call(&raw)?)
            }
            MessageType::Response => {
                let raw = self.codecs.compressor(compress)?.decompress(&body, self.max_frame_size)?;
                MessageBody::Result(self.codecs.serializer(codec)?.deserialize_result(&raw)?)
            }
            MessageType::HeartbeatPing => {
                expect_marker(&body, PING_BODY)?;
                MessageBody::Ping
            }
            MessageType::HeartbeatPong => {
                expect_marker(&body, PONG_BODY)?;
                MessageBody::Pong
            }
        };

        Ok(Some(WireMessage {
            codec,
            compress,
            request_id,
            body,
        }))
    }

    fn check_ids(&self, codec: u8, compress: u8) -> Result<()> {
        SerializationKind::from_code(codec)?;
        CompressionKind::from_code(compress)?;
        Ok(())
    }
}

fn expect_marker(body: &[u8], marker: &[u8]) -> Result<()> {
    if body != marker {
        return Err(RingrpcError::Protocol(format!(
            "Bad heartbeat body: {:?}",
            String::from_utf8_lossy(body)
        )));
    }
    Ok(())
}

impl Encoder<WireMessage> for WireCodec {
    type Error = RingrpcError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<()> {
        self.encode_message(&item, dst)
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = RingrpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>> {
        self.decode_message(src)
    }
}
