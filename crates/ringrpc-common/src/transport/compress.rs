use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::protocol::error::{Result, RingrpcError};

/// Compression codec ids carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionKind {
    None = 0x00,
    Gzip = 0x01,
}

impl CompressionKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(CompressionKind::None),
            0x01 => Ok(CompressionKind::Gzip),
            other => Err(RingrpcError::Protocol(format!(
                "Unknown compression codec id: {}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(CompressionKind::None),
            "gzip" => Ok(CompressionKind::Gzip),
            other => Err(RingrpcError::Extension(format!("compressor '{}'", other))),
        }
    }
}

/// Byte-to-byte transform applied to serialized envelopes.
pub trait Compressor: Send + Sync {
    fn kind(&self) -> CompressionKind;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Restores `data`. Output longer than `limit` bytes is a
    /// [`RingrpcError::Protocol`] error.
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>>;
}

fn expanded_past(limit: usize) -> RingrpcError {
    RingrpcError::Protocol(format!("Decompressed body exceeds {} bytes", limit))
}

/// Pass-through compressor.
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        if data.len() > limit {
            return Err(expanded_past(limit));
        }
        Ok(data.to_vec())
    }
}

/// Gzip compressor backed by `flate2`.
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 16), self.level);
        encoder
            .write_all(data)
            .map_err(|e| RingrpcError::Compression(format!("gzip compress failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| RingrpcError::Compression(format!("gzip compress failed: {}", e)))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        // One byte past the limit tells an exact fit from an overflow.
        let bound = (limit as u64).saturating_add(1);
        let mut decoder = GzDecoder::new(data).take(bound);
        let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(limit));
        decoder
            .read_to_end(&mut out)
            .map_err(|e| RingrpcError::Compression(format!("gzip decompress failed: {}", e)))?;
        if out.len() > limit {
            return Err(expanded_past(limit));
        }
        Ok(out)
    }
}
