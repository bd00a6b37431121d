//! Sorted slice store
//!
//! Keeps a column's values as a sequence of sorted slices, each paired with
//! the reverse indices (original row numbers) of its elements, plus the
//! per-slice bounds caches derived from the sorted values:
//!
//! ```text
//! sorted   [nrows x slicesize]      ascending within each slice
//! indices  [nrows x slicesize]      sorted[i][j] == column[indices[i][j]]
//! ranges   [nrows x 2]              (first, last) of each slice
//! bounds   [nrows x ncs-1]          first value of chunks 1..ncs
//! abounds  [nrows x ncs]            first value of every chunk
//! zbounds  [nrows x ncs]            last value of every chunk
//! mbounds  [nrows x ncs]            middle value of every chunk
//! mranges  [nrows x 1]              middle value of the slice
//! sortedLR [1 x slicesize+ncs+1]    partial last row, then its bebounds
//! indicesLR[1 x slicesize]
//! ```
//!
//! Every cache is a pure function of `sorted`; `ranges` and `bounds` are
//! mirrored in memory for the search path.

use crate::index::geometry::Geometry;
use crate::storage::{ByteOrder, DataType, Element, Filters, IndexError, IndexResult, TypedArray};
use std::path::{Path, PathBuf};

const SORTED_FILE: &str = "sorted.cia";
const INDICES_FILE: &str = "indices.cia";
const RANGES_FILE: &str = "ranges.cia";
const BOUNDS_FILE: &str = "bounds.cia";
const ABOUNDS_FILE: &str = "abounds.cia";
const ZBOUNDS_FILE: &str = "zbounds.cia";
const MBOUNDS_FILE: &str = "mbounds.cia";
const MRANGES_FILE: &str = "mranges.cia";
const SORTED_LR_FILE: &str = "sortedLR.cia";
const INDICES_LR_FILE: &str = "indicesLR.cia";

/// Which per-chunk value to read from the bounds caches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    /// First value of each chunk (`abounds`)
    Start,
    /// Last value of each chunk (`zbounds`)
    Stop,
    /// Middle value of each chunk (`mbounds`)
    Median,
}

/// Cache entries derived from one sorted slice
#[derive(Debug, Clone, PartialEq)]
pub struct SliceCaches<T> {
    pub range: (T, T),
    pub bounds: Vec<T>,
    pub abounds: Vec<T>,
    pub zbounds: Vec<T>,
    pub mbounds: Vec<T>,
    pub mrange: T,
}

impl<T: Element> SliceCaches<T> {
    /// Compute caches from a sorted slice of exactly `geometry.slicesize` values
    pub fn compute(sorted: &[T], geometry: &Geometry) -> Self {
        let cs = geometry.chunksize as usize;
        let ncs = geometry.nchunkslice() as usize;
        let n = sorted.len();

        Self {
            range: (sorted[0].clone(), sorted[n - 1].clone()),
            bounds: (1..ncs).map(|k| sorted[k * cs].clone()).collect(),
            abounds: (0..ncs).map(|k| sorted[k * cs].clone()).collect(),
            zbounds: (0..ncs).map(|k| sorted[k * cs + cs - 1].clone()).collect(),
            mbounds: (0..ncs).map(|k| sorted[k * cs + cs / 2].clone()).collect(),
            mrange: sorted[n / 2].clone(),
        }
    }
}

/// Ascending sort permutation of `values` (NaN last, ties in input order)
pub fn argsort<T: Element>(values: &[T]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..values.len()).collect();
    perm.sort_by(|&a, &b| values[a].sort_cmp(&values[b]));
    perm
}

/// Chunk starts of a sorted partial row, then its last value
///
/// Padded to `ncs + 1` entries by repeating the last value.
fn last_row_bounds<T: Element>(sorted: &[T], geometry: &Geometry) -> Vec<T> {
    let cs = geometry.chunksize as usize;
    let ncs = geometry.nchunkslice() as usize;
    let last = sorted[sorted.len() - 1].clone();

    let mut bebounds: Vec<T> = sorted.iter().step_by(cs).cloned().collect();
    bebounds.resize(ncs + 1, last);
    bebounds
}

/// On-disk sorted values, reverse indices and bounds caches of one index
pub struct SliceStore<T: Element> {
    dir: PathBuf,
    dtype: DataType,
    order: ByteOrder,
    geometry: Geometry,
    sorted: TypedArray<T>,
    indices: TypedArray<u64>,
    ranges: TypedArray<T>,
    bounds: TypedArray<T>,
    abounds: TypedArray<T>,
    zbounds: TypedArray<T>,
    mbounds: TypedArray<T>,
    mranges: TypedArray<T>,
    sorted_lr: TypedArray<T>,
    indices_lr: TypedArray<u64>,
    /// In-memory mirror of `ranges`
    range_cache: Vec<(T, T)>,
    /// In-memory mirror of `bounds`
    bounds_cache: Vec<Vec<T>>,
    /// Valid prefix of `bebounds` for the current last row
    bebounds: Vec<T>,
    nelements_lr: u64,
    /// Search scratch state must be rebuilt before the next search
    dirtycache: bool,
}

impl<T: Element> SliceStore<T> {
    /// Create an empty store in `dir`
    pub fn create(
        dir: &Path,
        dtype: DataType,
        order: ByteOrder,
        geometry: Geometry,
        filters: Filters,
    ) -> IndexResult<Self> {
        std::fs::create_dir_all(dir)?;

        let cs = geometry.chunksize as usize;
        let ss = geometry.slicesize as usize;
        let ncs = geometry.nchunkslice() as usize;
        let c = filters.compression;

        let values = |name: &str, row_len: usize, chunk_len: usize| {
            TypedArray::<T>::create(dir.join(name), dtype, row_len, chunk_len, c, order)
        };
        let rows = |name: &str, row_len: usize| {
            TypedArray::<u64>::create(dir.join(name), DataType::UInt64, row_len, cs, c, order)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            dtype,
            order,
            geometry,
            sorted: values(SORTED_FILE, ss, cs)?,
            indices: rows(INDICES_FILE, ss)?,
            ranges: values(RANGES_FILE, 2, 2)?,
            bounds: values(BOUNDS_FILE, ncs - 1, ncs)?,
            abounds: values(ABOUNDS_FILE, ncs, ncs)?,
            zbounds: values(ZBOUNDS_FILE, ncs, ncs)?,
            mbounds: values(MBOUNDS_FILE, ncs, ncs)?,
            mranges: values(MRANGES_FILE, 1, 1)?,
            sorted_lr: values(SORTED_LR_FILE, ss + ncs + 1, cs)?,
            indices_lr: rows(INDICES_LR_FILE, ss)?,
            range_cache: Vec::new(),
            bounds_cache: Vec::new(),
            bebounds: Vec::new(),
            nelements_lr: 0,
            dirtycache: true,
        })
    }

    /// Open an existing store
    pub fn open(
        dir: &Path,
        dtype: DataType,
        order: ByteOrder,
        geometry: Geometry,
        nelements_lr: u64,
    ) -> IndexResult<Self> {
        let values = |name: &str| TypedArray::<T>::open(dir.join(name), dtype, order);
        let rows = |name: &str| TypedArray::<u64>::open(dir.join(name), DataType::UInt64, order);

        let mut store = Self {
            dir: dir.to_path_buf(),
            dtype,
            order,
            geometry,
            sorted: values(SORTED_FILE)?,
            indices: rows(INDICES_FILE)?,
            ranges: values(RANGES_FILE)?,
            bounds: values(BOUNDS_FILE)?,
            abounds: values(ABOUNDS_FILE)?,
            zbounds: values(ZBOUNDS_FILE)?,
            mbounds: values(MBOUNDS_FILE)?,
            mranges: values(MRANGES_FILE)?,
            sorted_lr: values(SORTED_LR_FILE)?,
            indices_lr: rows(INDICES_LR_FILE)?,
            range_cache: Vec::new(),
            bounds_cache: Vec::new(),
            bebounds: Vec::new(),
            nelements_lr,
            dirtycache: true,
        };

        store.check_shapes()?;

        store.range_cache = store
            .ranges
            .read_all()?
            .into_iter()
            .map(|row| (row[0].clone(), row[1].clone()))
            .collect();
        store.bounds_cache = store.bounds.read_all()?;

        if nelements_lr > 0 {
            if store.sorted_lr.nrows() == 0 {
                return Err(IndexError::Corruption(format!(
                    "{} last-row elements recorded but no last row stored",
                    nelements_lr
                )));
            }
            let ss = geometry.slicesize as usize;
            let ncs = geometry.nchunkslice() as usize;
            let nchunks = (nelements_lr as usize).div_ceil(geometry.chunksize as usize);
            let stored = store.sorted_lr.read_range(0, ss, ss + ncs + 1)?;
            store.bebounds = stored[..nchunks + 1].to_vec();
        }

        tracing::debug!(
            "Opened slice store {:?}: {} slices, {} last-row elements",
            dir,
            store.nrows(),
            nelements_lr
        );
        Ok(store)
    }

    /// Every per-slice array must have one row per slice and the geometry's width
    fn check_shapes(&self) -> IndexResult<()> {
        let ss = self.geometry.slicesize as usize;
        let ncs = self.geometry.nchunkslice() as usize;
        let nrows = self.sorted.nrows();

        let shapes = [
            (SORTED_FILE, self.sorted.nrows(), self.sorted.row_len(), ss),
            (INDICES_FILE, self.indices.nrows(), self.indices.row_len(), ss),
            (RANGES_FILE, self.ranges.nrows(), self.ranges.row_len(), 2),
            (BOUNDS_FILE, self.bounds.nrows(), self.bounds.row_len(), ncs - 1),
            (ABOUNDS_FILE, self.abounds.nrows(), self.abounds.row_len(), ncs),
            (ZBOUNDS_FILE, self.zbounds.nrows(), self.zbounds.row_len(), ncs),
            (MBOUNDS_FILE, self.mbounds.nrows(), self.mbounds.row_len(), ncs),
            (MRANGES_FILE, self.mranges.nrows(), self.mranges.row_len(), 1),
        ];
        for (name, rows, width, expected_width) in shapes {
            if rows != nrows || width != expected_width {
                return Err(IndexError::Corruption(format!(
                    "{} is {}x{}, expected {}x{}",
                    name, rows, width, nrows, expected_width
                )));
            }
        }

        if self.sorted_lr.row_len() != ss + ncs + 1 || self.indices_lr.row_len() != ss {
            return Err(IndexError::Corruption("Last-row arrays have the wrong width".into()));
        }
        Ok(())
    }

    /// Append one full slice of unsorted column values
    pub fn append(&mut self, values: &[T]) -> IndexResult<()> {
        let ss = self.geometry.slicesize;
        if values.len() as u64 != ss {
            return Err(IndexError::Shape {
                expected: ss,
                actual: values.len() as u64,
            });
        }

        let offset = self.nrows() * ss;
        let perm = argsort(values);
        let sorted: Vec<T> = perm.iter().map(|&p| values[p].clone()).collect();
        let indices: Vec<u64> = perm.iter().map(|&p| offset + p as u64).collect();

        self.sorted.append_row(&sorted)?;
        self.indices.append_row(&indices)?;

        let caches = SliceCaches::compute(&sorted, &self.geometry);
        self.ranges
            .append_row(&[caches.range.0.clone(), caches.range.1.clone()])?;
        self.bounds.append_row(&caches.bounds)?;
        self.abounds.append_row(&caches.abounds)?;
        self.zbounds.append_row(&caches.zbounds)?;
        self.mbounds.append_row(&caches.mbounds)?;
        self.mranges.append_row(&[caches.mrange.clone()])?;

        self.range_cache.push(caches.range);
        self.bounds_cache.push(caches.bounds);

        self.nelements_lr = 0;
        self.bebounds.clear();
        self.dirtycache = true;

        tracing::debug!("Appended slice {} to {:?}", self.nrows() - 1, self.dir);
        Ok(())
    }

    /// Replace the partial last row with `values` (the unsorted column tail)
    ///
    /// `total_rows` is the column length; the tail must be exactly the
    /// elements past the last complete slice.
    pub fn append_last_row(&mut self, values: &[T], total_rows: u64) -> IndexResult<()> {
        let ss = self.geometry.slicesize;
        let offset = self.nrows() * ss;
        let expected = total_rows.checked_sub(offset).ok_or_else(|| {
            IndexError::Consistency(format!(
                "Column has {} rows but {} are already in complete slices",
                total_rows, offset
            ))
        })?;

        if values.len() as u64 != expected {
            return Err(IndexError::Consistency(format!(
                "Last row has {} elements, column bookkeeping expects {}",
                values.len(),
                expected
            )));
        }
        if expected >= ss {
            return Err(IndexError::Consistency(format!(
                "Tail of {} elements does not fit a last row of {}",
                expected, ss
            )));
        }

        self.dirtycache = true;
        if values.is_empty() {
            self.nelements_lr = 0;
            self.bebounds.clear();
            return Ok(());
        }

        let perm = argsort(values);
        let mut sorted: Vec<T> = perm.iter().map(|&p| values[p].clone()).collect();
        let mut indices: Vec<u64> = perm.iter().map(|&p| offset + p as u64).collect();

        let bebounds = last_row_bounds(&sorted, &self.geometry);
        let nchunks = values.len().div_ceil(self.geometry.chunksize as usize);

        let last = sorted[sorted.len() - 1].clone();
        sorted.resize(ss as usize, last);
        sorted.extend(bebounds.iter().cloned());
        indices.resize(ss as usize, 0);

        if self.sorted_lr.nrows() == 0 {
            self.sorted_lr.append_row(&sorted)?;
            self.indices_lr.append_row(&indices)?;
        } else {
            self.sorted_lr.write_row(0, &sorted)?;
            self.indices_lr.write_row(0, &indices)?;
        }

        self.bebounds = bebounds[..nchunks + 1].to_vec();
        self.nelements_lr = values.len() as u64;

        tracing::debug!(
            "Refreshed last row of {:?}: {} elements",
            self.dir,
            self.nelements_lr
        );
        Ok(())
    }

    fn check_slice(&self, slice: u64) -> IndexResult<()> {
        if slice >= self.nrows() {
            return Err(IndexError::Precondition(format!(
                "Slice {} out of range ({} slices)",
                slice,
                self.nrows()
            )));
        }
        Ok(())
    }

    /// Sorted values of a complete slice
    pub fn read_slice(&mut self, slice: u64) -> IndexResult<Vec<T>> {
        self.check_slice(slice)?;
        self.sorted.read_row(slice)
    }

    /// Sorted values `[start, end)` of a complete slice
    pub fn read_slice_range(&mut self, slice: u64, start: usize, end: usize) -> IndexResult<Vec<T>> {
        self.check_slice(slice)?;
        self.sorted.read_range(slice, start, end)
    }

    /// Reverse indices of a complete slice
    pub fn read_indices(&mut self, slice: u64) -> IndexResult<Vec<u64>> {
        self.check_slice(slice)?;
        self.indices.read_row(slice)
    }

    pub fn read_indices_range(&mut self, slice: u64, start: usize, end: usize) -> IndexResult<Vec<u64>> {
        self.check_slice(slice)?;
        self.indices.read_range(slice, start, end)
    }

    fn check_last_row(&self, start: usize, end: usize) -> IndexResult<()> {
        if start > end || end as u64 > self.nelements_lr {
            return Err(IndexError::Precondition(format!(
                "Last-row range {}..{} out of bounds ({} elements)",
                start, end, self.nelements_lr
            )));
        }
        Ok(())
    }

    /// Sorted values `[start, end)` of the partial last row
    pub fn read_last_row(&mut self, start: usize, end: usize) -> IndexResult<Vec<T>> {
        self.check_last_row(start, end)?;
        if start == end {
            return Ok(Vec::new());
        }
        self.sorted_lr.read_range(0, start, end)
    }

    /// Reverse indices `[start, end)` of the partial last row
    pub fn read_last_indices(&mut self, start: usize, end: usize) -> IndexResult<Vec<u64>> {
        self.check_last_row(start, end)?;
        if start == end {
            return Ok(Vec::new());
        }
        self.indices_lr.read_range(0, start, end)
    }

    /// Overwrite slice `slice` with re-sorted values and recompute its caches
    pub(crate) fn rewrite_slice(&mut self, slice: u64, sorted: &[T], indices: &[u64]) -> IndexResult<()> {
        self.check_slice(slice)?;

        self.sorted.write_row(slice, sorted)?;
        self.indices.write_row(slice, indices)?;

        let caches = SliceCaches::compute(sorted, &self.geometry);
        self.ranges
            .write_row(slice, &[caches.range.0.clone(), caches.range.1.clone()])?;
        self.bounds.write_row(slice, &caches.bounds)?;
        self.abounds.write_row(slice, &caches.abounds)?;
        self.zbounds.write_row(slice, &caches.zbounds)?;
        self.mbounds.write_row(slice, &caches.mbounds)?;
        self.mranges.write_row(slice, &[caches.mrange.clone()])?;

        self.range_cache[slice as usize] = caches.range;
        self.bounds_cache[slice as usize] = caches.bounds;
        self.dirtycache = true;
        Ok(())
    }

    /// Per-chunk bound values of every slice
    pub fn read_chunk_bounds(&mut self, kind: BoundKind) -> IndexResult<Vec<Vec<T>>> {
        match kind {
            BoundKind::Start => self.abounds.read_all(),
            BoundKind::Stop => self.zbounds.read_all(),
            BoundKind::Median => self.mbounds.read_all(),
        }
    }

    /// Middle value of every slice
    pub fn read_mranges(&mut self) -> IndexResult<Vec<T>> {
        Ok(self
            .mranges
            .read_all()?
            .into_iter()
            .map(|mut row| row.remove(0))
            .collect())
    }

    /// Persist every array
    pub fn flush(&mut self) -> IndexResult<()> {
        self.sorted.flush()?;
        self.indices.flush()?;
        self.ranges.flush()?;
        self.bounds.flush()?;
        self.abounds.flush()?;
        self.zbounds.flush()?;
        self.mbounds.flush()?;
        self.mranges.flush()?;
        self.sorted_lr.flush()?;
        self.indices_lr.flush()?;
        Ok(())
    }

    /// Persist every array and fsync it
    pub fn sync(&mut self) -> IndexResult<()> {
        self.sorted.sync()?;
        self.indices.sync()?;
        self.ranges.sync()?;
        self.bounds.sync()?;
        self.abounds.sync()?;
        self.zbounds.sync()?;
        self.mbounds.sync()?;
        self.mranges.sync()?;
        self.sorted_lr.sync()?;
        self.indices_lr.sync()?;
        Ok(())
    }

    // ==================== Geometry ====================

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn itemsize(&self) -> usize {
        self.dtype.itemsize()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of complete slices
    pub fn nrows(&self) -> u64 {
        self.sorted.nrows()
    }

    pub fn nslices(&self) -> u64 {
        self.nrows()
    }

    pub fn nelements(&self) -> u64 {
        self.nrows() * self.geometry.slicesize + self.nelements_lr
    }

    pub fn nelements_lr(&self) -> u64 {
        self.nelements_lr
    }

    /// Blocks spanned by the complete slices (last one may be short)
    pub fn nblocks(&self) -> u64 {
        self.nrows().div_ceil(self.geometry.nslicesblock())
    }

    /// Superblocks spanned by the complete slices (last one may be short)
    pub fn nsuperblocks(&self) -> u64 {
        self.nrows().div_ceil(self.geometry.nslicessuperblock())
    }

    pub fn nchunkslice(&self) -> u64 {
        self.geometry.nchunkslice()
    }

    pub fn nslicesblock(&self) -> u64 {
        self.geometry.nslicesblock()
    }

    pub fn nblockssuperblock(&self) -> u64 {
        self.geometry.nblockssuperblock()
    }

    // ==================== Caches ====================

    /// `(first, last)` of every complete slice
    pub fn ranges(&self) -> &[(T, T)] {
        &self.range_cache
    }

    /// Chunk boundary values of one complete slice
    pub fn bounds(&self, slice: usize) -> &[T] {
        &self.bounds_cache[slice]
    }

    /// Chunk starts of the last row followed by its last value
    pub fn last_row_bounds(&self) -> &[T] {
        &self.bebounds
    }

    /// `(first, last)` of the last row, if it holds any element
    pub fn last_row_range(&self) -> Option<(T, T)> {
        match (self.bebounds.first(), self.bebounds.last()) {
            (Some(first), Some(last)) if self.nelements_lr > 0 => Some((first.clone(), last.clone())),
            _ => None,
        }
    }

    pub fn is_dirtycache(&self) -> bool {
        self.dirtycache
    }

    pub fn set_dirtycache(&mut self, dirty: bool) {
        self.dirtycache = dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Compression;
    use tempfile::tempdir;

    fn small_geometry() -> Geometry {
        // chunk 2, slice 4, block 8, superblock 16
        Geometry::new(2, 2, 2, 2).unwrap()
    }

    fn create_store(dir: &Path) -> SliceStore<i32> {
        SliceStore::create(
            dir,
            DataType::Int32,
            ByteOrder::Little,
            small_geometry(),
            Filters::new(Compression::Lz4),
        )
        .unwrap()
    }

    #[test]
    fn test_append_sorts_and_records_indices() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());

        store.append(&[5, 1, 3, 2]).unwrap();
        store.append(&[9, 7, 6, 8]).unwrap();
        store.append(&[0, 4, 10, 11]).unwrap();

        assert_eq!(store.nrows(), 3);
        assert_eq!(store.nelements(), 12);
        assert_eq!(store.read_slice(0).unwrap(), vec![1, 2, 3, 5]);
        assert_eq!(store.read_indices(0).unwrap(), vec![1, 3, 2, 0]);
        assert_eq!(store.read_indices(1).unwrap(), vec![6, 5, 7, 4]);
        assert_eq!(store.read_slice(2).unwrap(), vec![0, 4, 10, 11]);

        assert_eq!(store.ranges(), &[(1, 5), (6, 9), (0, 11)]);
        assert_eq!(store.bounds(0), &[3]);
        assert_eq!(store.read_chunk_bounds(BoundKind::Start).unwrap()[1], vec![6, 8]);
        assert_eq!(store.read_chunk_bounds(BoundKind::Stop).unwrap()[1], vec![7, 9]);
        assert_eq!(store.read_chunk_bounds(BoundKind::Median).unwrap()[0], vec![2, 5]);
        assert_eq!(store.read_mranges().unwrap(), vec![3, 8, 10]);
    }

    #[test]
    fn test_append_wrong_length_is_shape_error() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());

        let err = store.append(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, IndexError::Shape { expected: 4, actual: 3 }));
        assert_eq!(store.nrows(), 0);
    }

    #[test]
    fn test_last_row_bookkeeping() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());
        store.append(&[5, 1, 3, 2]).unwrap();

        store.append_last_row(&[8, 6, 7], 7).unwrap();
        assert_eq!(store.nelements_lr(), 3);
        assert_eq!(store.nelements(), 7);
        assert_eq!(store.read_last_row(0, 3).unwrap(), vec![6, 7, 8]);
        assert_eq!(store.read_last_indices(0, 3).unwrap(), vec![5, 6, 4]);
        // One entry per chunk start plus the last value
        assert_eq!(store.last_row_bounds(), &[6, 8, 8]);
        assert_eq!(store.last_row_range(), Some((6, 8)));

        let err = store.append_last_row(&[1, 2], 7).unwrap_err();
        assert!(matches!(err, IndexError::Consistency(_)));
        let err = store.append_last_row(&[1], 3).unwrap_err();
        assert!(matches!(err, IndexError::Consistency(_)));
        assert!(store.read_last_row(0, 4).is_err());
    }

    #[test]
    fn test_last_row_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());

        store.append_last_row(&[3, 1], 2).unwrap();
        let first = (store.last_row_bounds().to_vec(), store.nelements_lr());
        store.append_last_row(&[3, 1], 2).unwrap();
        let second = (store.last_row_bounds().to_vec(), store.nelements_lr());
        assert_eq!(first, second);

        store.append_last_row(&[], 0).unwrap();
        assert_eq!(store.nelements_lr(), 0);
        assert!(store.last_row_range().is_none());
    }

    #[test]
    fn test_full_slice_resets_last_row() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());

        store.append_last_row(&[2, 1], 2).unwrap();
        store.append(&[4, 3, 2, 1]).unwrap();
        assert_eq!(store.nelements_lr(), 0);
        assert_eq!(store.nelements(), 4);
    }

    #[test]
    fn test_reopen_restores_caches() {
        let dir = tempdir().unwrap();
        {
            let mut store = create_store(dir.path());
            store.append(&[5, 1, 3, 2]).unwrap();
            store.append(&[9, 7, 6, 8]).unwrap();
            store.append_last_row(&[12, 10, 11], 11).unwrap();
            store.flush().unwrap();
        }

        let mut store: SliceStore<i32> = SliceStore::open(
            dir.path(),
            DataType::Int32,
            ByteOrder::Little,
            small_geometry(),
            3,
        )
        .unwrap();

        assert_eq!(store.nrows(), 2);
        assert_eq!(store.ranges(), &[(1, 5), (6, 9)]);
        assert_eq!(store.bounds(1), &[8]);
        assert_eq!(store.last_row_bounds(), &[10, 12, 12]);
        assert_eq!(store.read_last_row(1, 3).unwrap(), vec![11, 12]);
        assert!(store.is_dirtycache());
    }

    #[test]
    fn test_geometry_accessors() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());
        for i in 0..5 {
            store.append(&[i, i + 1, i + 2, i + 3]).unwrap();
        }

        assert_eq!(store.nslices(), 5);
        assert_eq!(store.nchunkslice(), 2);
        assert_eq!(store.nslicesblock(), 2);
        assert_eq!(store.nblockssuperblock(), 2);
        assert_eq!(store.nblocks(), 3);
        assert_eq!(store.nsuperblocks(), 2);
    }

    #[test]
    fn test_rewrite_slice_updates_caches() {
        let dir = tempdir().unwrap();
        let mut store = create_store(dir.path());
        store.append(&[5, 1, 3, 2]).unwrap();
        store.set_dirtycache(false);

        store.rewrite_slice(0, &[10, 20, 30, 40], &[3, 2, 1, 0]).unwrap();
        assert_eq!(store.ranges(), &[(10, 40)]);
        assert_eq!(store.bounds(0), &[30]);
        assert_eq!(store.read_mranges().unwrap(), vec![30]);
        assert!(store.is_dirtycache());
    }
}
