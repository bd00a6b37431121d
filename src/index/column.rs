//! Column Index - the public surface of one indexed column
//!
//! Ties together:
//! - SliceStore (sorted values, reverse indices, bounds caches)
//! - RangeSearch (range lookups with a result cache)
//! - Optimizer (slice/chunk reordering)
//! - IndexAttrs (persisted metadata)
//!
//! # Usage
//!
//! ```text
//! table append  → index.extend(new values)
//!                   full slices → append, tail → append_last_row
//! query         → index.lookup_range([ge, lt], [10, 20]) → [10, 19]
//!                 index.search(interval, scratch) → count
//!                 index.row_coords(scratch) → row numbers
//! maintenance   → index.optimize(None, false)
//! ```

use crate::index::attrs::{IndexAttrs, ReorderFlags};
use crate::index::cache::CacheSettings;
use crate::index::geometry::{Geometry, GeometryBudget};
use crate::index::limits::{closed_interval, CompareOp, Interval};
use crate::index::optimizer::{overlap_stats, OptimizeReport, Optimizer, OptimizerSettings, OverlapStats};
use crate::index::search::{RangeSearch, SearchScratch};
use crate::index::slices::SliceStore;
use crate::index::IndexStats;
use crate::storage::{ByteOrder, DataType, Element, Filters, IndexError, IndexResult};
use std::path::{Path, PathBuf};

/// Options for creating or opening an index
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Expected column length, used to size chunks
    pub expected_rows: u64,
    /// Default optimization level (0-9)
    pub optlevel: u8,
    pub filters: Filters,
    pub byte_order: ByteOrder,
    pub budget: GeometryBudget,
    /// Explicit geometry, overriding `expected_rows` and `budget`
    pub geometry: Option<Geometry>,
    pub cache: CacheSettings,
    pub optimizer: OptimizerSettings,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            expected_rows: 100_000,
            optlevel: 6,
            filters: Filters::default(),
            byte_order: ByteOrder::native(),
            budget: GeometryBudget::default(),
            geometry: None,
            cache: CacheSettings::default(),
            optimizer: OptimizerSettings::default(),
        }
    }
}

impl IndexOptions {
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_optlevel(mut self, optlevel: u8) -> Self {
        self.optlevel = optlevel;
        self
    }

    pub fn with_expected_rows(mut self, expected_rows: u64) -> Self {
        self.expected_rows = expected_rows;
        self
    }
}

/// A sorted secondary index over one column of element type `T`
pub struct ColumnIndex<T: Element> {
    dir: PathBuf,
    attrs: IndexAttrs,
    store: SliceStore<T>,
    search: RangeSearch<T>,
    optimizer: OptimizerSettings,
    /// Attributes changed since the last save
    attrs_dirty: bool,
    /// Directory removed; nothing left to flush
    destroyed: bool,
}

/// Reject element types that do not match the persisted data type
fn check_type<T: Element>(dtype: DataType) -> IndexResult<()> {
    let native = T::data_type(dtype.itemsize());
    if native != dtype {
        return Err(IndexError::UnsupportedType(format!(
            "Index stores {} values, accessed as {}",
            dtype, native
        )));
    }
    Ok(())
}

impl<T: Element> ColumnIndex<T> {
    /// Create a new, empty index in `dir`
    pub fn create(dir: impl AsRef<Path>, dtype: DataType, options: IndexOptions) -> IndexResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        check_type::<T>(dtype)?;

        if options.optlevel > 9 {
            return Err(IndexError::Precondition(format!(
                "Optimization level must be 0-9, got {}",
                options.optlevel
            )));
        }
        if IndexAttrs::path(&dir).exists() {
            return Err(IndexError::Precondition(format!(
                "An index already exists in {:?}",
                dir
            )));
        }

        let geometry = match options.geometry {
            Some(geometry) => {
                geometry.validate()?;
                geometry
            }
            None => Geometry::compute(dtype.itemsize(), options.expected_rows, &options.budget)?,
        };

        let store = SliceStore::create(&dir, dtype, options.byte_order, geometry, options.filters)?;
        let attrs = IndexAttrs::new(
            dtype,
            options.byte_order,
            geometry,
            options.optlevel,
            options.filters,
        );
        attrs.save(&dir)?;

        tracing::info!("Created {} index at {:?} ({})", dtype, dir, geometry);

        Ok(Self {
            search: RangeSearch::new(options.cache, options.byte_order, dtype.itemsize()),
            optimizer: options.optimizer,
            dir,
            attrs,
            store,
            attrs_dirty: false,
            destroyed: false,
        })
    }

    /// Open an existing index. Only the cache and optimizer options apply.
    pub fn open(dir: impl AsRef<Path>, options: IndexOptions) -> IndexResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let attrs = IndexAttrs::load(&dir)?;
        check_type::<T>(attrs.dtype)?;

        let store = SliceStore::open(
            &dir,
            attrs.dtype,
            attrs.byte_order,
            attrs.geometry,
            attrs.nelements_lr,
        )?;

        tracing::info!(
            "Opened {} index at {:?}: {} elements in {} slices",
            attrs.dtype,
            dir,
            store.nelements(),
            store.nrows()
        );

        Ok(Self {
            search: RangeSearch::new(options.cache, attrs.byte_order, attrs.dtype.itemsize()),
            optimizer: options.optimizer,
            dir,
            attrs,
            store,
            attrs_dirty: false,
            destroyed: false,
        })
    }

    // ==================== Appends ====================

    /// Append one full slice (`slicesize` values) of column data
    pub fn append(&mut self, values: &[T]) -> IndexResult<()> {
        self.store.append(values)?;
        self.attrs.nelements_lr = 0;
        self.attrs_dirty = true;
        Ok(())
    }

    /// Replace the unsorted column tail (`total_rows` is the column length)
    pub fn append_last_row(&mut self, values: &[T], total_rows: u64) -> IndexResult<()> {
        self.store.append_last_row(values, total_rows)?;
        self.attrs.nelements_lr = self.store.nelements_lr();
        self.attrs_dirty = true;
        Ok(())
    }

    /// The current tail in column order
    fn unsorted_tail(&mut self) -> IndexResult<Vec<T>> {
        let lr = self.store.nelements_lr() as usize;
        let values = self.store.read_last_row(0, lr)?;
        let rows = self.store.read_last_indices(0, lr)?;

        let mut pairs: Vec<(u64, T)> = rows.into_iter().zip(values).collect();
        pairs.sort_by_key(|(row, _)| *row);
        Ok(pairs.into_iter().map(|(_, value)| value).collect())
    }

    /// Index `values` appended to the column: fill slices, then refresh the tail
    pub fn extend(&mut self, values: &[T]) -> IndexResult<()> {
        if values.is_empty() {
            return Ok(());
        }

        let ss = self.store.geometry().slicesize as usize;
        let total_rows = self.store.nelements() + values.len() as u64;

        let mut pending = self.unsorted_tail()?;
        pending.extend_from_slice(values);

        let full = pending.len() / ss * ss;
        for slice in pending[..full].chunks_exact(ss) {
            self.append(slice)?;
        }
        self.append_last_row(&pending[full..], total_rows)?;

        tracing::debug!(
            "Extended index at {:?} by {} values ({} total)",
            self.dir,
            values.len(),
            total_rows
        );
        Ok(())
    }

    // ==================== Search ====================

    /// Closed interval for one or two range conditions, `None` if empty
    pub fn lookup_range(&self, ops: &[CompareOp], limits: &[T]) -> IndexResult<Option<Interval<T>>> {
        closed_interval(ops, limits, self.attrs.dtype.itemsize())
    }

    /// Count matches of `interval`, recording per-slice runs in `scratch`
    pub fn search(&mut self, interval: Option<&Interval<T>>, scratch: &mut SearchScratch) -> IndexResult<u64> {
        self.search.search(&mut self.store, interval, scratch)
    }

    /// Convert range conditions and search
    pub fn search_ops(
        &mut self,
        ops: &[CompareOp],
        limits: &[T],
        scratch: &mut SearchScratch,
    ) -> IndexResult<u64> {
        let interval = self.lookup_range(ops, limits)?;
        self.search(interval.as_ref(), scratch)
    }

    /// Original row numbers of the matches recorded in `scratch`
    pub fn row_coords(&mut self, scratch: &SearchScratch) -> IndexResult<Vec<u64>> {
        let nrows = self.store.nrows() as usize;
        let mut rows = Vec::with_capacity(scratch.total() as usize);
        for (slot, start, length) in scratch.nonzero() {
            let (start, end) = (start as usize, (start + length) as usize);
            if slot < nrows {
                rows.extend(self.store.read_indices_range(slot as u64, start, end)?);
            } else {
                rows.extend(self.store.read_last_indices(start, end)?);
            }
        }
        Ok(rows)
    }

    pub fn read_sorted(&mut self, slice: u64) -> IndexResult<Vec<T>> {
        self.store.read_slice(slice)
    }

    pub fn read_indices(&mut self, slice: u64) -> IndexResult<Vec<u64>> {
        self.store.read_indices(slice)
    }

    /// Sorted values `[start, end)` of the partial last row
    pub fn read_last_row(&mut self, start: usize, end: usize) -> IndexResult<Vec<T>> {
        self.store.read_last_row(start, end)
    }

    // ==================== Optimization ====================

    /// Reorder slices to reduce overlaps (`None` uses the index's level)
    pub fn optimize(&mut self, level: Option<u8>, verbose: bool) -> IndexResult<OptimizeReport> {
        let level = level.unwrap_or(self.attrs.optlevel);
        let report = Optimizer::new(&mut self.store, self.optimizer, verbose).run(level)?;

        if report.changed() {
            self.attrs.reorder_opt_flags = report.flags;
            self.attrs_dirty = true;
        }
        self.flush()?;
        Ok(report)
    }

    /// Overlap statistic of the current slice order
    pub fn overlaps(&self) -> OverlapStats {
        overlap_stats(&self.store)
    }

    // ==================== Attributes ====================

    pub fn is_dirty(&self) -> bool {
        self.attrs.dirty
    }

    /// Mark the index as out of sync with its column (persisted immediately)
    pub fn set_dirty(&mut self, dirty: bool) -> IndexResult<()> {
        self.attrs.dirty = dirty;
        self.attrs.save(&self.dir)?;
        Ok(())
    }

    pub fn set_user_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.user.insert(key.into(), value.into());
        self.attrs_dirty = true;
    }

    pub fn attrs(&self) -> &IndexAttrs {
        &self.attrs
    }

    pub fn reorder_flags(&self) -> ReorderFlags {
        self.attrs.reorder_opt_flags
    }

    pub fn geometry(&self) -> &Geometry {
        self.store.geometry()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn nelements(&self) -> u64 {
        self.store.nelements()
    }

    pub fn nrows(&self) -> u64 {
        self.store.nrows()
    }

    pub fn nelements_lr(&self) -> u64 {
        self.store.nelements_lr()
    }

    pub fn stats(&self) -> IndexStats {
        let cache = self.search.cache_stats();
        IndexStats {
            dtype: self.attrs.dtype,
            nelements: self.store.nelements(),
            nrows: self.store.nrows(),
            nelements_lr: self.store.nelements_lr(),
            nblocks: self.store.nblocks(),
            nsuperblocks: self.store.nsuperblocks(),
            geometry: *self.store.geometry(),
            optlevel: self.attrs.optlevel,
            dirty: self.attrs.dirty,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
        }
    }

    // ==================== Lifecycle ====================

    /// Persist arrays and attributes
    pub fn flush(&mut self) -> IndexResult<()> {
        self.store.flush()?;
        if self.attrs_dirty {
            self.attrs.save(&self.dir)?;
            self.attrs_dirty = false;
        }
        Ok(())
    }

    /// Remove the index from disk
    pub fn destroy(mut self) -> IndexResult<()> {
        self.destroyed = true;
        std::fs::remove_dir_all(&self.dir)?;
        tracing::info!("Removed index at {:?}", self.dir);
        Ok(())
    }
}

impl<T: Element> Drop for ColumnIndex<T> {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush index at {:?}: {}", self.dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Compression, FixedBytes};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn tiny() -> IndexOptions {
        // chunk 2, slice 4, block 8, superblock 16
        IndexOptions::default().with_geometry(Geometry::new(2, 2, 2, 2).unwrap())
    }

    #[test]
    fn test_worked_example() {
        let dir = tempdir().unwrap();
        let mut index: ColumnIndex<i32> =
            ColumnIndex::create(dir.path().join("col"), DataType::Int32, tiny()).unwrap();

        index.append(&[5, 1, 3, 2]).unwrap();
        index.append(&[9, 7, 6, 8]).unwrap();
        index.append(&[0, 4, 10, 11]).unwrap();

        assert_eq!(index.read_sorted(0).unwrap(), vec![1, 2, 3, 5]);
        assert_eq!(index.read_indices(0).unwrap(), vec![1, 3, 2, 0]);

        let mut scratch = SearchScratch::new();
        let total = index
            .search_ops(&[CompareOp::Ge, CompareOp::Le], &[2, 7], &mut scratch)
            .unwrap();
        assert_eq!(total, 6);

        let mut rows = index.row_coords(&scratch).unwrap();
        rows.sort();
        // column: 5 1 3 2 | 9 7 6 8 | 0 4 10 11
        assert_eq!(rows, vec![0, 2, 3, 5, 6, 9]);
    }

    #[test]
    fn test_empty_range_returns_zero() {
        let dir = tempdir().unwrap();
        let mut index: ColumnIndex<i32> =
            ColumnIndex::create(dir.path(), DataType::Int32, tiny()).unwrap();
        index.extend(&[5, 1, 3, 2, 9, 7]).unwrap();

        let mut scratch = SearchScratch::new();
        let total = index
            .search_ops(&[CompareOp::Gt, CompareOp::Lt], &[10, 5], &mut scratch)
            .unwrap();
        assert_eq!(total, 0);
        assert_eq!(scratch.len(), 2);
        assert!(scratch.lengths().iter().all(|&l| l == 0));
        assert!(scratch.starts().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_open_matches_created() {
        let dir = tempdir().unwrap();
        {
            let mut index: ColumnIndex<f64> =
                ColumnIndex::create(dir.path(), DataType::Float64, tiny()).unwrap();
            index.extend(&[0.5, 2.5, 1.5, 9.0, 3.0, 4.0, 8.0]).unwrap();
            index.set_user_attr("title", "prices");
        }

        let mut index: ColumnIndex<f64> = ColumnIndex::open(dir.path(), IndexOptions::default()).unwrap();
        assert_eq!(index.nelements(), 7);
        assert_eq!(index.nrows(), 1);
        assert_eq!(index.nelements_lr(), 3);
        assert_eq!(index.attrs().user.get("title").map(String::as_str), Some("prices"));

        let mut scratch = SearchScratch::new();
        let total = index
            .search_ops(&[CompareOp::Gt], &[2.5], &mut scratch)
            .unwrap();
        // 9.0 | 3.0, 4.0, 8.0
        assert_eq!(total, 4);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        ColumnIndex::<i32>::create(dir.path(), DataType::Int32, tiny()).unwrap();

        let err = ColumnIndex::<i64>::open(dir.path(), IndexOptions::default()).err().unwrap();
        assert!(matches!(err, IndexError::UnsupportedType(_)));

        let other = tempdir().unwrap();
        let err = ColumnIndex::<f32>::create(other.path(), DataType::Float64, tiny()).err().unwrap();
        assert!(matches!(err, IndexError::UnsupportedType(_)));
    }

    #[test]
    fn test_zero_geometry_is_rejected_not_panicking() {
        let dir = tempdir().unwrap();
        ColumnIndex::<i32>::create(dir.path(), DataType::Int32, tiny()).unwrap();

        let path = IndexAttrs::path(dir.path());
        let mut attrs: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        attrs["geometry"]["chunksize"] = serde_json::json!(0);
        std::fs::write(&path, serde_json::to_string(&attrs).unwrap()).unwrap();

        let err = ColumnIndex::<i32>::open(dir.path(), IndexOptions::default()).err().unwrap();
        assert!(matches!(err, IndexError::InvalidFormat(_)));

        let other = tempdir().unwrap();
        let broken = Geometry {
            chunksize: 0,
            ..Geometry::new(2, 2, 2, 2).unwrap()
        };
        let err = ColumnIndex::<i32>::create(other.path(), DataType::Int32, tiny().with_geometry(broken))
            .err()
            .unwrap();
        assert!(matches!(err, IndexError::InvalidFormat(_)));
    }

    #[test]
    fn test_create_refuses_existing_index() {
        let dir = tempdir().unwrap();
        ColumnIndex::<u16>::create(dir.path(), DataType::UInt16, tiny()).unwrap();
        assert!(ColumnIndex::<u16>::create(dir.path(), DataType::UInt16, tiny()).is_err());
    }

    #[test]
    fn test_extend_reconstructs_tail() {
        let dir = tempdir().unwrap();
        let mut index: ColumnIndex<i64> =
            ColumnIndex::create(dir.path(), DataType::Int64, tiny()).unwrap();

        let column: Vec<i64> = vec![7, 3, 9, 1, 4, 8, 2, 6, 5, 0, 11];
        index.extend(&column[..3]).unwrap();
        index.extend(&column[3..6]).unwrap();
        index.extend(&column[6..]).unwrap();

        assert_eq!(index.nrows(), 2);
        assert_eq!(index.nelements_lr(), 3);
        // Rows 0..4 in slice 0, whatever batches they arrived in
        assert_eq!(index.read_indices(0).unwrap(), vec![3, 1, 0, 2]);
        assert_eq!(index.read_sorted(1).unwrap(), vec![2, 4, 6, 8]);

        let mut scratch = SearchScratch::new();
        index.search_ops(&[CompareOp::Ge], &[0], &mut scratch).unwrap();
        let mut rows = index.row_coords(&scratch).unwrap();
        rows.sort();
        assert_eq!(rows, (0..11).collect::<Vec<u64>>());
    }

    #[test]
    fn test_dirty_flag_persists() {
        let dir = tempdir().unwrap();
        {
            let mut index: ColumnIndex<i32> =
                ColumnIndex::create(dir.path(), DataType::Int32, tiny()).unwrap();
            assert!(!index.is_dirty());
            index.set_dirty(true).unwrap();
        }
        let index: ColumnIndex<i32> = ColumnIndex::open(dir.path(), IndexOptions::default()).unwrap();
        assert!(index.is_dirty());
    }

    #[test]
    fn test_byte_string_index() {
        let dir = tempdir().unwrap();
        let mut index: ColumnIndex<FixedBytes> =
            ColumnIndex::create(dir.path(), DataType::Bytes(4), tiny()).unwrap();
        let words: Vec<FixedBytes> = ["pear", "fig", "kiwi", "lime", "date", "plum"]
            .iter()
            .map(|w| FixedBytes::new(w.as_bytes(), 4))
            .collect();
        index.extend(&words).unwrap();

        let mut scratch = SearchScratch::new();
        let limits = [FixedBytes::new(b"fig", 4), FixedBytes::new(b"lime", 4)];
        let total = index
            .search_ops(&[CompareOp::Ge, CompareOp::Lt], &limits, &mut scratch)
            .unwrap();
        // fig, kiwi
        assert_eq!(total, 2);
        let mut rows = index.row_coords(&scratch).unwrap();
        rows.sort();
        assert_eq!(rows, vec![1, 2]);
    }

    #[test]
    fn test_optimize_keeps_results_and_records_flags() {
        let mut rng = StdRng::seed_from_u64(5);
        let dir = tempdir().unwrap();
        let options = IndexOptions {
            filters: Filters::new(Compression::Lz4),
            ..IndexOptions::default()
        }
        .with_geometry(Geometry::new(4, 4, 4, 2).unwrap())
        .with_optlevel(9);
        let mut index: ColumnIndex<f32> = ColumnIndex::create(dir.path(), DataType::Float32, options).unwrap();

        let column: Vec<f32> = (0..16 * 20 + 5).map(|_| rng.gen_range(-100.0..100.0)).collect();
        index.extend(&column).unwrap();

        let queries: Vec<(f32, f32)> = (0..30)
            .map(|_| {
                let a: f32 = rng.gen_range(-110.0..110.0);
                let b: f32 = rng.gen_range(a..=110.0);
                (a, b)
            })
            .collect();
        let expected: Vec<u64> = queries
            .iter()
            .map(|&(a, b)| column.iter().filter(|&&v| a <= v && v <= b).count() as u64)
            .collect();

        let before = index.overlaps();
        let report = index.optimize(None, false).unwrap();
        assert!(report.result.noverlaps <= before.noverlaps);
        if report.changed() {
            assert_eq!(index.reorder_flags(), ReorderFlags::for_level(9));
        }

        let mut scratch = SearchScratch::new();
        for (&(a, b), &count) in queries.iter().zip(&expected) {
            let total = index
                .search_ops(&[CompareOp::Ge, CompareOp::Le], &[a, b], &mut scratch)
                .unwrap();
            assert_eq!(total, count, "[{}, {}]", a, b);

            let rows = index.row_coords(&scratch).unwrap();
            assert!(rows.iter().all(|&r| a <= column[r as usize] && column[r as usize] <= b));
        }

        // Reopen after optimizing
        drop(index);
        let mut index: ColumnIndex<f32> = ColumnIndex::open(dir.path(), IndexOptions::default()).unwrap();
        let (a, b) = queries[0];
        assert_eq!(
            index
                .search_ops(&[CompareOp::Ge, CompareOp::Le], &[a, b], &mut scratch)
                .unwrap(),
            expected[0]
        );
    }

    #[test]
    fn test_stats_and_destroy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col");
        let mut index: ColumnIndex<u8> = ColumnIndex::create(&path, DataType::UInt8, tiny()).unwrap();
        index.extend(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

        let mut scratch = SearchScratch::new();
        index.search_ops(&[CompareOp::Eq], &[3], &mut scratch).unwrap();
        index.search_ops(&[CompareOp::Eq], &[3], &mut scratch).unwrap();

        let stats = index.stats();
        assert_eq!(stats.nelements, 9);
        assert_eq!(stats.nrows, 2);
        assert_eq!(stats.nelements_lr, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!(stats.to_string().contains("uint8"));

        index.destroy().unwrap();
        assert!(!path.exists());
    }
}
