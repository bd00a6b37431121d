//! Chunk compression for array files
//!
//! Every chunk of an array row is stored as an independent block so a
//! range read only has to decode the chunks it overlaps.
//!
//! Strategy:
//! 1. `Compression::None` stores the encoded element bytes as-is
//! 2. `Compression::Lz4` LZ4-compresses them with the size prepended
//!
//! Scratch workspaces of the optimizer always use `None` for speed.

use crate::storage::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compression applied to chunk blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
}

impl TryFrom<u8> for Compression {
    type Error = IndexError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(IndexError::InvalidFormat(format!(
                "Unknown compression type: {}",
                value
            ))),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            other => Err(IndexError::Config(format!("Unknown compression: {}", other))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Lz4 => write!(f, "lz4"),
        }
    }
}

/// Filters applied to the persistent arrays of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Filters {
    pub compression: Compression,
}

impl Filters {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    /// Filters for temporary data: no compression
    pub fn uncompressed() -> Self {
        Self {
            compression: Compression::None,
        }
    }
}

/// Encode a chunk payload
pub fn compress_chunk(raw: &[u8], compression: Compression) -> Vec<u8> {
    match compression {
        Compression::None => raw.to_vec(),
        Compression::Lz4 => lz4_flex::compress_prepend_size(raw),
    }
}

/// Decode a chunk payload back to `expected_len` raw bytes
pub fn decompress_chunk(
    data: &[u8],
    compression: Compression,
    expected_len: usize,
) -> IndexResult<Vec<u8>> {
    let raw = match compression {
        Compression::None => data.to_vec(),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(data).map_err(|e| {
            IndexError::Compression(format!("LZ4 decompression failed: {}", e))
        })?,
    };

    if raw.len() != expected_len {
        return Err(IndexError::Corruption(format!(
            "Chunk decoded to {} bytes, expected {}",
            raw.len(),
            expected_len
        )));
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_roundtrip_lz4() {
        let raw: Vec<u8> = (0..4096u32).flat_map(|i| (i / 16).to_le_bytes()).collect();
        let packed = compress_chunk(&raw, Compression::Lz4);
        assert!(packed.len() < raw.len());

        let restored = decompress_chunk(&packed, Compression::Lz4, raw.len()).unwrap();
        assert_eq!(restored, raw);
    }

    #[test]
    fn test_chunk_uncompressed_is_identity() {
        let raw = vec![1u8, 2, 3, 4];
        let packed = compress_chunk(&raw, Compression::None);
        assert_eq!(packed, raw);
    }

    #[test]
    fn test_length_mismatch_is_corruption() {
        let raw = vec![7u8; 64];
        let packed = compress_chunk(&raw, Compression::Lz4);
        let err = decompress_chunk(&packed, Compression::Lz4, 32).unwrap_err();
        assert!(matches!(err, IndexError::Corruption(_)));
    }

    #[test]
    fn test_compression_codes() {
        assert_eq!(Compression::try_from(0).unwrap(), Compression::None);
        assert_eq!(Compression::try_from(1).unwrap(), Compression::Lz4);
        assert!(Compression::try_from(9).is_err());
        assert_eq!("LZ4".parse::<Compression>().unwrap(), Compression::Lz4);
        assert!("zstd".parse::<Compression>().is_err());
    }
}
