//! ringrpc Transport Layer
//!
//! This module provides the binary frame codec and the TCP helpers built on it.
//!
//! # Components
//!
//! - **[`WireCodec`]**: frames [`WireMessage`](crate::WireMessage)s; implements
//!   `tokio_util::codec::{Encoder, Decoder}` for `Framed*` streams
//! - **[`Codecs`]**: serializer and compressor tables resolved by name
//! - **[`Serializer`]** / **[`Compressor`]**: pluggable body transforms
//! - **[`TcpTransport`]**: blocking one-frame-at-a-time transport
//! - **[`connect_async`]**: tokio connect with a deadline
//!
//! # Message Size Limits
//!
//! Frame bodies are capped (8 MiB unless configured otherwise); larger frames
//! are rejected on both encode and decode.

pub mod codec;
pub mod compress;
pub mod serialize;
pub mod tcp;

pub use codec::{Codecs, WireCodec, HEADER_LEN, MAGIC, VERSION};
pub use compress::{CompressionKind, Compressor, GzipCompressor, IdentityCompressor};
pub use serialize::{JsonSerializer, MessagePackSerializer, SerializationKind, Serializer};
pub use tcp::{connect_async, map_io_error, TcpTransport};
