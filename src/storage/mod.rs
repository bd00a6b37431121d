//! colindex storage layer
//!
//! This module provides the typed array storage the index is built on:
//!
//! - **types**: Element types (DataType, ByteOrder, Element, FixedBytes)
//! - **compression**: Per-chunk LZ4 compression
//! - **array**: Chunked, checksummed array file format
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   [T] row → encode (byte order) → split into chunks → LZ4 → blocks + footer
//!
//! Read Path:
//!   (row, start..end) → overlapping chunks → verify crc → decompress → decode
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use colindex::storage::{ByteOrder, Compression, DataType, TypedArray};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut array: TypedArray<i64> = TypedArray::create(
//!         "./data/values.cia",
//!         DataType::Int64,
//!         1024,
//!         256,
//!         Compression::Lz4,
//!         ByteOrder::Little,
//!     )?;
//!
//!     let row: Vec<i64> = (0..1024).collect();
//!     array.append_row(&row)?;
//!     array.flush()?;
//!
//!     let window = array.read_range(0, 250, 260)?;
//!     assert_eq!(window.len(), 10);
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod compression;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use array::{ArrayFile, ArrayHeader, BlockRef, TypedArray};
pub use compression::{compress_chunk, decompress_chunk, Compression, Filters};
pub use error::{IndexError, IndexResult};
pub use types::{decode_all, encode_all, ByteOrder, DataType, Element, FixedBytes, Scalar};
