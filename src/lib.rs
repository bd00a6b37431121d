//! # Colindex
//!
//! Disk-resident sorted secondary index for columnar data. A column is
//! split into fixed-size slices; each slice is stored sorted together with
//! the original row numbers, so range queries bisect instead of scanning.
//!
//! ## Features
//!
//! - **Chunked storage**: Per-chunk LZ4 blocks with checksums
//! - **Hierarchical search**: Slice ranges and chunk bounds narrow each bisect
//! - **Result cache**: LRU cache of recent range searches
//! - **Optimization**: Reorders values between slices to reduce overlaps
//!
//! ## Modules
//!
//! - [`storage`]: Array files, element types and errors
//! - [`index`]: Slice store, range search, optimizer and the index handle
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colindex::index::{ColumnIndex, CompareOp, IndexOptions, SearchScratch};
//! use colindex::storage::DataType;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut index: ColumnIndex<i64> =
//!         ColumnIndex::create("./prices.idx", DataType::Int64, IndexOptions::default())?;
//!
//!     // Index the column as it grows
//!     index.extend(&[42, 7, 19, 3, 88])?;
//!
//!     // Rows where 5 <= value < 50
//!     let mut scratch = SearchScratch::new();
//!     let count = index.search_ops(&[CompareOp::Ge, CompareOp::Lt], &[5, 50], &mut scratch)?;
//!     let rows = index.row_coords(&scratch)?;
//!     println!("{} matches at rows {:?}", count, rows);
//!
//!     index.optimize(None, false)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{ByteOrder, DataType, Element, FixedBytes, IndexError, IndexResult};

pub use index::{
    ColumnIndex, CompareOp, Geometry, IndexOptions, IndexStats, Interval, OptimizeReport,
    SearchScratch,
};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};
