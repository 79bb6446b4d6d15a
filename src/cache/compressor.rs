//! Optional zstd compression of stored payloads.
//!
//! When enabled, payloads are compressed before insertion and the compressed
//! length is what the store accounts against the budget. Decompression happens
//! on every hit; a payload that fails to decode is reported so the service can
//! drop the corrupt entry and refetch.

use bytes::Bytes;
use thiserror::Error;

use crate::config::CompressionConfig;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("zstd decompression failed: {0}")]
    Decode(#[from] std::io::Error),
}

/// Compression engine for stored study payloads.
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Prepare a payload for storage. Returns the bytes to store and whether
    /// they are compressed. A compression failure falls back to storing the
    /// payload as-is; the cache never loses a fetched study to a codec error.
    pub fn encode(&self, payload: &Bytes) -> (Bytes, bool) {
        if !self.config.enabled {
            return (payload.clone(), false);
        }

        match zstd::encode_all(payload.as_ref(), self.config.zstd_level) {
            Ok(compressed) => (Bytes::from(compressed), true),
            Err(err) => {
                tracing::warn!(error = %err, "Compression failed, storing uncompressed");
                (payload.clone(), false)
            }
        }
    }

    /// Recover the original payload from a stored entry.
    pub fn decode(&self, stored: &Bytes, compressed: bool) -> Result<Bytes, CompressionError> {
        if !compressed {
            return Ok(stored.clone());
        }
        let decompressed = zstd::decode_all(stored.as_ref())?;
        Ok(Bytes::from(decompressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let compressor = Compressor::new(CompressionConfig {
            enabled: true,
            zstd_level: 3,
        });
        let payload = Bytes::from(vec![42u8; 4096]);

        let (stored, compressed) = compressor.encode(&payload);
        assert!(compressed);
        assert!(stored.len() < payload.len()); // repetitive data compresses well

        let recovered = compressor.decode(&stored, compressed).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_disabled_passes_through() {
        let compressor = Compressor::new(CompressionConfig::default());
        let payload = Bytes::from_static(b"pixels");

        let (stored, compressed) = compressor.encode(&payload);
        assert!(!compressed);
        assert_eq!(stored, payload);
        assert_eq!(compressor.decode(&stored, compressed).unwrap(), payload);
    }

    #[test]
    fn test_corrupt_data_reports_error() {
        let compressor = Compressor::new(CompressionConfig {
            enabled: true,
            zstd_level: 3,
        });
        let garbage = Bytes::from_static(b"definitely not a zstd frame");
        assert!(compressor.decode(&garbage, true).is_err());
    }
}
