//! Index attributes - JSON metadata stored next to the arrays
//!
//! Everything needed to reopen an index lives here: element type, byte
//! order, geometry, optimization level and the counters that the array
//! shapes alone cannot recover (the valid length of the last row).
//!
//! # Usage
//! ```ignore
//! let mut attrs = IndexAttrs::load(dir)?;
//! attrs.dirty = true;
//! attrs.save(dir)?;
//! ```

use crate::index::geometry::Geometry;
use crate::storage::{ByteOrder, DataType, Filters, IndexError, IndexResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Attribute file name inside an index directory
pub const ATTRS_FILE: &str = "attrs.json";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Which reorder passes an optimization level runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReorderFlags {
    /// Chunk swaps (and slice swaps) keyed by median values
    pub median: bool,
    /// Chunk swaps keyed by chunk start values
    pub starts: bool,
    /// Chunk swaps keyed by chunk stop values
    pub stops: bool,
    /// Full optimization: every pass, repeated
    pub full: bool,
}

impl ReorderFlags {
    /// Reorder passes for an optimization level (0-9)
    pub fn for_level(level: u8) -> Self {
        match level {
            0..=2 => Self::default(),
            3..=5 => Self {
                starts: true,
                ..Self::default()
            },
            6..=8 => Self {
                starts: true,
                stops: true,
                ..Self::default()
            },
            _ => Self {
                median: true,
                starts: true,
                stops: true,
                full: true,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.median || self.starts || self.stops || self.full)
    }
}

/// Persisted metadata of one index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexAttrs {
    pub format_version: u32,
    pub dtype: DataType,
    pub byte_order: ByteOrder,
    pub geometry: Geometry,
    /// Optimization level used when `optimize` is called without one
    pub optlevel: u8,
    /// Set by the column layer when the index is out of sync with the data
    pub dirty: bool,
    /// Valid elements in the last (partial) row
    pub nelements_lr: u64,
    /// Passes applied by the most recent optimization
    #[serde(default)]
    pub reorder_opt_flags: ReorderFlags,
    pub filters: Filters,
    pub created_at: DateTime<Utc>,
    /// Free-form attributes (title etc.), passed through verbatim
    #[serde(default)]
    pub user: BTreeMap<String, String>,
}

impl IndexAttrs {
    pub fn new(
        dtype: DataType,
        byte_order: ByteOrder,
        geometry: Geometry,
        optlevel: u8,
        filters: Filters,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            dtype,
            byte_order,
            geometry,
            optlevel,
            dirty: false,
            nelements_lr: 0,
            reorder_opt_flags: ReorderFlags::default(),
            filters,
            created_at: Utc::now(),
            user: BTreeMap::new(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(ATTRS_FILE)
    }

    /// Load attributes from an index directory
    pub fn load(dir: &Path) -> IndexResult<Self> {
        let file = File::open(Self::path(dir))?;
        let reader = BufReader::new(file);

        let attrs: IndexAttrs = serde_json::from_reader(reader).map_err(|e| {
            IndexError::Serialization(format!("Failed to load index attributes: {}", e))
        })?;

        if attrs.format_version > FORMAT_VERSION {
            return Err(IndexError::InvalidFormat(format!(
                "Unsupported index format version: {}",
                attrs.format_version
            )));
        }
        if attrs.optlevel > 9 {
            return Err(IndexError::InvalidFormat(format!(
                "Optimization level {} out of range",
                attrs.optlevel
            )));
        }
        attrs.geometry.validate()?;
        if attrs.nelements_lr >= attrs.geometry.slicesize {
            return Err(IndexError::InvalidFormat(format!(
                "Last row holds {} elements, slice size is {}",
                attrs.nelements_lr, attrs.geometry.slicesize
            )));
        }

        Ok(attrs)
    }

    /// Persist attributes (write to a temp file, then rename over)
    pub fn save(&self, dir: &Path) -> IndexResult<()> {
        std::fs::create_dir_all(dir)?;

        let path = Self::path(dir);
        let tmp_path = path.with_extension("json.tmp");

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| {
            IndexError::Serialization(format!("Failed to persist index attributes: {}", e))
        })?;
        writer.flush()?;
        drop(writer);

        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Compression;
    use tempfile::tempdir;

    fn sample() -> IndexAttrs {
        IndexAttrs::new(
            DataType::Float64,
            ByteOrder::Big,
            Geometry::new(4, 2, 2, 2).unwrap(),
            6,
            Filters::new(Compression::Lz4),
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut attrs = sample();
        attrs.nelements_lr = 3;
        attrs.dirty = true;
        attrs.user.insert("title".into(), "price index".into());
        attrs.save(dir.path()).unwrap();

        let loaded = IndexAttrs::load(dir.path()).unwrap();
        assert_eq!(loaded.dtype, DataType::Float64);
        assert_eq!(loaded.byte_order, ByteOrder::Big);
        assert_eq!(loaded.geometry, attrs.geometry);
        assert_eq!(loaded.optlevel, 6);
        assert!(loaded.dirty);
        assert_eq!(loaded.nelements_lr, 3);
        assert_eq!(loaded.user.get("title").map(String::as_str), Some("price index"));
        assert_eq!(loaded.created_at, attrs.created_at);
        assert!(!IndexAttrs::path(dir.path()).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_bad_geometry() {
        let dir = tempdir().unwrap();
        let mut attrs = sample();
        attrs.geometry.slicesize = 12;
        attrs.save(dir.path()).unwrap();

        assert!(IndexAttrs::load(dir.path()).is_err());
    }

    #[test]
    fn test_reorder_flags_per_level() {
        assert!(ReorderFlags::for_level(0).is_empty());
        assert!(ReorderFlags::for_level(2).is_empty());

        let starts = ReorderFlags::for_level(4);
        assert!(starts.starts && !starts.stops && !starts.median);

        let both = ReorderFlags::for_level(7);
        assert!(both.starts && both.stops && !both.full);

        let full = ReorderFlags::for_level(9);
        assert!(full.median && full.starts && full.stops && full.full);
    }
}
