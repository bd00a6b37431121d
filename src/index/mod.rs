//! Column Index Structures
//!
//! A sorted secondary index over one column, answering range queries
//! without scanning the column:
//!
//! - **SliceStore**: column split into fixed-size slices, each stored sorted
//!   with the original row numbers alongside
//! - **RangeSearch**: per-slice bisect, narrowed by cached chunk bounds
//! - **Optimizer**: moves values between slices so slice ranges overlap less
//! - **ColumnIndex**: the public handle tying these together
//!
//! # Architecture
//!
//! ```text
//! Query: "values in [10, 20)"
//!        ↓
//! lookup_range: ge 10, lt 20 → closed interval [10, 19]
//!        ↓
//! ranges cache: skip slices whose (min, max) misses the interval
//!        ↓
//! bounds cache: find the chunk holding each end → read one chunk
//!        ↓
//! scratch: (start, length) per slice → row_coords → row numbers
//! ```

pub mod attrs;
pub mod cache;
mod column;
pub mod geometry;
pub mod limits;
pub mod optimizer;
pub mod search;
pub mod slices;

pub use attrs::{IndexAttrs, ReorderFlags};
pub use cache::{BoundedCache, CacheSettings, CacheStats};
pub use column::{ColumnIndex, IndexOptions};
pub use geometry::{Geometry, GeometryBudget};
pub use limits::{closed_interval, CompareOp, Interval};
pub use optimizer::{OptimizeReport, OptimizerSettings, OverlapStats, StopReason, SwapStep};
pub use search::{RangeSearch, SearchScratch};
pub use slices::{BoundKind, SliceStore};

use crate::storage::DataType;
use std::fmt;

/// Statistics about one index
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub dtype: DataType,
    /// Indexed elements, last row included
    pub nelements: u64,
    /// Complete slices
    pub nrows: u64,
    /// Elements in the partial last row
    pub nelements_lr: u64,
    pub nblocks: u64,
    pub nsuperblocks: u64,
    pub geometry: Geometry,
    pub optlevel: u8,
    pub dirty: bool,
    /// Search result cache hits
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "type:         {}", self.dtype)?;
        writeln!(f, "elements:     {}", self.nelements)?;
        writeln!(
            f,
            "slices:       {} (+{} in last row)",
            self.nrows, self.nelements_lr
        )?;
        writeln!(
            f,
            "blocks:       {} in {} superblocks",
            self.nblocks, self.nsuperblocks
        )?;
        writeln!(f, "geometry:     {}", self.geometry)?;
        writeln!(f, "optlevel:     {}", self.optlevel)?;
        writeln!(f, "dirty:        {}", self.dirty)?;
        write!(
            f,
            "cache:        {} hits, {} misses",
            self.cache_hits, self.cache_misses
        )
    }
}
