//! Payload compression.
//!
//! Vectors above the configured byte threshold are lz4-compressed before
//! being handed to a tier; decoding is symmetric and lossless for both
//! plain and compressed payloads. A failed compression falls back to the
//! uncompressed form instead of failing the write.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::warn;

use crate::entry::{CompressedVector, VectorPayload};
use crate::error::{CacheError, Result};

/// Serialized size of a vector before compression.
pub fn vector_byte_len(vector: &[f32]) -> usize {
    vector.len() * 4
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(CacheError::Decompression(format!(
            "payload length {} is not a whole number of floats",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn compress_bytes(bytes: &[u8], level: i32) -> Result<Vec<u8>> {
    lz4::block::compress(
        bytes,
        Some(lz4::block::CompressionMode::HIGHCOMPRESSION(level)),
        true,
    )
    .map_err(|e| CacheError::Compression(e.to_string()))
}

fn decompress_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(bytes, None).map_err(|e| CacheError::Decompression(e.to_string()))
}

/// Encode a vector for storage.
///
/// Compresses when enabled and the vector exceeds `threshold_bytes`;
/// otherwise (or when compression fails) stores the raw floats.
pub fn encode_payload(
    vector: Vec<f32>,
    enabled: bool,
    threshold_bytes: usize,
    level: i32,
) -> VectorPayload {
    if !enabled || vector_byte_len(&vector) <= threshold_bytes {
        return VectorPayload::Plain(vector);
    }

    match compress_bytes(&vector_to_bytes(&vector), level) {
        Ok(compressed) => VectorPayload::Compressed(CompressedVector {
            compressed: true,
            data: BASE64.encode(compressed),
        }),
        Err(e) => {
            warn!("compression failed, storing uncompressed: {e}");
            VectorPayload::Plain(vector)
        }
    }
}

/// Decode a stored payload back into the raw vector.
pub fn decode_payload(payload: &VectorPayload) -> Result<Vec<f32>> {
    match payload {
        VectorPayload::Plain(vector) => Ok(vector.clone()),
        VectorPayload::Compressed(compressed) => {
            let raw = BASE64
                .decode(&compressed.data)
                .map_err(|e| CacheError::Decompression(e.to_string()))?;
            bytes_to_vector(&decompress_bytes(&raw)?)
        }
    }
}
