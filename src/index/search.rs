//! Range search over sorted slices
//!
//! For a closed interval `[lo, hi]` every slice is binary searched for the
//! run of values inside the interval. Results go into a caller-owned
//! [`SearchScratch`] as one `(start, length)` pair per slice, plus a final
//! slot for the partial last row when it holds elements.
//!
//! Two search paths:
//! - Accelerated element types (i32, i64, f32, f64) first consult the
//!   in-memory slice ranges and chunk bounds, then decode a single chunk
//!   per side to finish the bisect.
//! - Every other type reads the whole slice and bisects it.
//!
//! The last row is always located through its chunk-start bounds.
//! Sparse results are kept in an LRU keyed by the encoded interval.

use crate::index::cache::{BoundedCache, CacheSettings, CacheStats};
use crate::index::limits::Interval;
use crate::index::slices::SliceStore;
use crate::storage::{ByteOrder, Element, IndexResult};
use std::marker::PhantomData;

/// Non-empty `(slot, start, length)` triples of one search
pub type SparseResult = Vec<(u64, u64, u64)>;

/// Per-slice search output, reused across searches
#[derive(Debug, Clone, Default)]
pub struct SearchScratch {
    starts: Vec<u64>,
    lengths: Vec<u64>,
}

impl SearchScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize to `slots` entries, all zero
    fn reset(&mut self, slots: usize) {
        self.starts.clear();
        self.starts.resize(slots, 0);
        self.lengths.clear();
        self.lengths.resize(slots, 0);
    }

    fn set(&mut self, slot: usize, start: u64, length: u64) {
        self.starts[slot] = start;
        self.lengths[slot] = length;
    }

    /// Start of the matching run in each slot
    pub fn starts(&self) -> &[u64] {
        &self.starts
    }

    /// Length of the matching run in each slot
    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    /// Number of slots (complete slices plus the last row, if any)
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.lengths.iter().sum()
    }

    /// Slots with at least one match
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, u64, u64)> + '_ {
        self.starts
            .iter()
            .zip(&self.lengths)
            .enumerate()
            .filter(|&(_, (_, &length))| length > 0)
            .map(|(slot, (&start, &length))| (slot, start, length))
    }
}

/// First position whose value is not below `lo`
fn bisect_left<T: Element>(values: &[T], lo: &T) -> usize {
    values.partition_point(|v| v.sort_cmp(lo).is_lt())
}

/// First position whose value is above `hi`
fn bisect_right<T: Element>(values: &[T], hi: &T) -> usize {
    values.partition_point(|v| v.sort_cmp(hi).is_le())
}

/// A sorted run located through its chunk boundaries
struct Run<'a, T> {
    first: &'a T,
    last: &'a T,
    /// First value of chunks 1.. of the run
    boundaries: &'a [T],
    len: usize,
    chunksize: usize,
}

impl<T: Element> Run<'_, T> {
    /// `(start, stop)` of `[lo, hi]`, decoding at most one chunk per side
    fn locate<F>(&self, interval: &Interval<T>, mut read: F) -> IndexResult<(usize, usize)>
    where
        F: FnMut(usize, usize) -> IndexResult<Vec<T>>,
    {
        let (lo, hi) = (&interval.lo, &interval.hi);
        if hi.sort_cmp(self.first).is_lt() || lo.sort_cmp(self.last).is_gt() {
            return Ok((0, 0));
        }

        let cs = self.chunksize;
        let chunk_span = |chunk: usize| (chunk * cs, ((chunk + 1) * cs).min(self.len));

        let start = if lo.sort_cmp(self.first).is_le() {
            0
        } else {
            let chunk = bisect_left(self.boundaries, lo);
            let (from, to) = chunk_span(chunk);
            from + bisect_left(&read(from, to)?, lo)
        };

        let stop = if hi.sort_cmp(self.last).is_ge() {
            self.len
        } else {
            let chunk = bisect_right(self.boundaries, hi);
            let (from, to) = chunk_span(chunk);
            from + bisect_right(&read(from, to)?, hi)
        };

        Ok((start, stop.max(start)))
    }
}

/// Range search engine with a result cache
pub struct RangeSearch<T: Element> {
    cache: BoundedCache<Vec<u8>, SparseResult>,
    order: ByteOrder,
    itemsize: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> RangeSearch<T> {
    pub fn new(settings: CacheSettings, order: ByteOrder, itemsize: usize) -> Self {
        Self {
            cache: BoundedCache::new(settings),
            order,
            itemsize,
            _marker: PhantomData,
        }
    }

    fn cache_key(&self, interval: &Interval<T>) -> Vec<u8> {
        let mut key = Vec::with_capacity(2 * self.itemsize);
        interval.lo.encode(self.order, self.itemsize, &mut key);
        interval.hi.encode(self.order, self.itemsize, &mut key);
        key
    }

    /// Count the elements inside `interval` and record where they are
    ///
    /// `None` is the empty interval: every slot is zeroed and 0 returned.
    pub fn search(
        &mut self,
        store: &mut SliceStore<T>,
        interval: Option<&Interval<T>>,
        scratch: &mut SearchScratch,
    ) -> IndexResult<u64> {
        if store.is_dirtycache() {
            self.cache.clear();
            store.set_dirtycache(false);
        }

        let nrows = store.nrows() as usize;
        let has_last_row = store.nelements_lr() > 0;
        scratch.reset(nrows + usize::from(has_last_row));

        let interval = match interval {
            Some(interval) => interval,
            None => return Ok(0),
        };

        let key = self.cache_key(interval);
        if let Some(hit) = self.cache.get(&key) {
            let mut total = 0;
            for &(slot, start, length) in hit {
                scratch.set(slot as usize, start, length);
                total += length;
            }
            return Ok(total);
        }

        let mut total = 0;
        for slice in 0..nrows {
            let (start, stop) = if T::ACCELERATED {
                Self::search_slice_bounded(store, slice, interval)?
            } else {
                Self::search_slice(store, slice, interval)?
            };
            let length = (stop - start) as u64;
            if length > 0 {
                scratch.set(slice, start as u64, length);
                total += length;
            }
        }

        if has_last_row {
            let (start, stop) = Self::search_last_row(store, interval)?;
            let length = (stop - start) as u64;
            if length > 0 {
                scratch.set(nrows, start as u64, length);
                total += length;
            }
        }

        let sparse: SparseResult = scratch
            .nonzero()
            .map(|(slot, start, length)| (slot as u64, start, length))
            .collect();
        let size = 16 * sparse.len() + 1;
        self.cache.insert(key, sparse, size);

        tracing::debug!(
            "Search [{:?}, {:?}] matched {} elements in {} slots",
            interval.lo,
            interval.hi,
            total,
            scratch.len()
        );
        Ok(total)
    }

    /// Hierarchical search: slice range, chunk bounds, then one chunk per side
    fn search_slice_bounded(
        store: &mut SliceStore<T>,
        slice: usize,
        interval: &Interval<T>,
    ) -> IndexResult<(usize, usize)> {
        let (first, last) = store.ranges()[slice].clone();
        let boundaries = store.bounds(slice).to_vec();
        let run = Run {
            first: &first,
            last: &last,
            boundaries: &boundaries,
            len: store.geometry().slicesize as usize,
            chunksize: store.geometry().chunksize as usize,
        };
        run.locate(interval, |from, to| store.read_slice_range(slice as u64, from, to))
    }

    /// Plain bisect over the whole slice
    fn search_slice(
        store: &mut SliceStore<T>,
        slice: usize,
        interval: &Interval<T>,
    ) -> IndexResult<(usize, usize)> {
        let values = store.read_slice(slice as u64)?;
        let start = bisect_left(&values, &interval.lo);
        let stop = bisect_right(&values, &interval.hi).max(start);
        Ok((start, stop))
    }

    /// Search the partial last row through its chunk-start bounds
    fn search_last_row(store: &mut SliceStore<T>, interval: &Interval<T>) -> IndexResult<(usize, usize)> {
        let bebounds = store.last_row_bounds().to_vec();
        let (first, last) = match (bebounds.first(), bebounds.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok((0, 0)),
        };
        let run = Run {
            first,
            last,
            boundaries: &bebounds[1..bebounds.len() - 1],
            len: store.nelements_lr() as usize,
            chunksize: store.geometry().chunksize as usize,
        };
        run.locate(interval, |from, to| store.read_last_row(from, to))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
