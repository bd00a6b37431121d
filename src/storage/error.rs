//! Index error types
//!
//! Defines all errors that can occur in the storage and index layers.

use thiserror::Error;

/// Errors that can occur while building, searching or optimizing an index
#[derive(Error, Debug)]
pub enum IndexError {
    /// Caller violated an operation precondition (bad parameters, bad geometry)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Appended data does not have the shape the store expects
    #[error("Shape error: expected {expected} elements, got {actual}")]
    Shape { expected: u64, actual: u64 },

    /// Caller bookkeeping disagrees with the store's bookkeeping
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Element type outside the supported numeric/string set
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Array file format error
    #[error("Invalid array format: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::Shape {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Shape error: expected 4 elements, got 3");

        let err = IndexError::UnsupportedType("complex128".to_string());
        assert_eq!(err.to_string(), "Unsupported type: complex128");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IndexError = io_err.into();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: IndexError = json_err.into();
        assert!(matches!(err, IndexError::Serialization(_)));
    }
}
