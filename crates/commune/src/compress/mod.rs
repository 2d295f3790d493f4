//! Payload compression
//!
//! Decides whether a payload is worth compressing and performs the
//! reversible zstd round-trip. Compression is transparent to callers:
//! the store records whether a given entry was compressed and the true
//! post-compression size, and a compression pass that would expand the
//! payload falls back to storing raw.

use crate::error::{CommuneError, Result};

/// Default zstd compression level (zstd's own default)
const ZSTD_LEVEL: i32 = 3;

/// Decides on and performs payload compression.
///
/// Pure over byte buffers; holds only the decision threshold.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    threshold_bytes: u64,
}

impl Compressor {
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }

    /// Whether a payload of this size should be run through compression.
    /// Tiny payloads are skipped outright; the CPU cost outweighs any
    /// plausible saving below the threshold.
    pub fn should_compress(&self, raw_size_bytes: u64) -> bool {
        raw_size_bytes >= self.threshold_bytes
    }

    /// Compress a payload, returning the compressed bytes and the ratio
    /// `compressed_len / raw_len`. A ratio >= 1.0 means compression
    /// expanded the data and the caller must store the raw payload
    /// instead.
    pub fn compress(&self, payload: &[u8]) -> Result<(Vec<u8>, f64)> {
        let compressed = zstd::encode_all(payload, ZSTD_LEVEL)
            .map_err(|e| CommuneError::Corruption(format!("zstd encode failed: {e}")))?;
        let ratio = if payload.is_empty() {
            // Empty input always "expands" (zstd emits a header)
            f64::INFINITY
        } else {
            compressed.len() as f64 / payload.len() as f64
        };
        Ok((compressed, ratio))
    }

    /// Exact byte-for-byte inverse of [`compress`](Self::compress).
    /// Corrupted input surfaces as `Corruption`, never as silently
    /// wrong data.
    pub fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(compressed)
            .map_err(|e| CommuneError::Corruption(format!("zstd decode failed: {e}")))
    }
}
