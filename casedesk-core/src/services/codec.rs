//! Payload encoding for the persistent tier
//!
//! Values are serialized to canonical JSON, then gzip-compressed. The
//! `compressed` flag on each record drives decoding, so toggling
//! compression never strands records written under the other setting.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{CoreError, CoreResult};

/// Encoded payload ready to be wrapped in a [`CacheRecord`](crate::types::CacheRecord).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    /// Length of the serialized text before compression
    pub size: u64,
    pub compressed: bool,
}

/// JSON + gzip codec.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    compression: Option<Compression>,
}

impl PayloadCodec {
    #[must_use]
    pub fn new(compress: bool, level: u32) -> Self {
        Self {
            compression: compress.then(|| Compression::new(level.min(9))),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.compression, config.compression_level)
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CoreResult<EncodedPayload> {
        let text = serde_json::to_vec(value)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        let size = text.len() as u64;

        let Some(level) = self.compression else {
            return Ok(EncodedPayload {
                bytes: text,
                size,
                compressed: false,
            });
        };

        let mut encoder = GzEncoder::new(Vec::with_capacity(text.len() / 2), level);
        encoder
            .write_all(&text)
            .map_err(|e| CoreError::CompressionError(e.to_string()))?;
        let bytes = encoder
            .finish()
            .map_err(|e| CoreError::CompressionError(e.to_string()))?;

        Ok(EncodedPayload {
            bytes,
            size,
            compressed: true,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], compressed: bool) -> CoreResult<T> {
        if !compressed {
            return serde_json::from_slice(bytes)
                .map_err(|e| CoreError::SerializationError(e.to_string()));
        }

        let mut text = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut text)
            .map_err(|e| CoreError::CompressionError(e.to_string()))?;
        serde_json::from_slice(&text).map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
