//! Index optimizer
//!
//! Reorders chunks within blocks and slices within superblocks so that
//! slice value ranges overlap less. Fewer overlaps mean a range search
//! finds its matches in fewer slices. The multiset of `(value, row)` pairs
//! never changes.
//!
//! # Passes
//!
//! ```text
//! level 0-2   nothing
//! level 3-5   chunks by start
//! level 6-8   chunks by start, chunks by stop
//! level 9     [chunks by median, slices by median, chunks by start,
//!              chunks by stop] x full_passes
//! ```
//!
//! Every pass stages the rewritten slices in an uncompressed scratch
//! workspace (a temporary directory removed when the optimizer returns)
//! and copies them back only if the overlap count does not grow.

use crate::index::attrs::ReorderFlags;
use crate::index::slices::{argsort, BoundKind, SliceStore};
use crate::storage::{DataType, Element, Filters, IndexError, IndexResult, TypedArray};
use serde::{Deserialize, Serialize};
use std::fmt;
use tempfile::TempDir;

/// Thresholds that end or skip reorder passes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Skip a block when fewer chunks than this fraction move; stop when a
    /// whole pass moves less
    pub min_moved_chunks: f64,
    /// Skip a superblock when fewer slices than this fraction move
    pub min_moved_slices: f64,
    /// Stop when fewer slice pairs overlap
    pub min_overlaps: u64,
    /// Stop when the overlap ratio is below this value
    pub min_overlap_ratio: f64,
    /// Stop when a chunk pass improves neither the overlap count nor the
    /// overlap ratio by this fraction relative to the previous chunk pass
    pub min_improvement: f64,
    /// Repetitions of the full pass list at level 9
    pub full_passes: u32,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            min_moved_chunks: 0.01,
            min_moved_slices: 0.025,
            min_overlaps: 4,
            min_overlap_ratio: 0.001,
            min_improvement: 0.05,
            full_passes: 2,
        }
    }
}

/// Overlap between slice value ranges
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverlapStats {
    /// Slice pairs `(i < j)` where slice `j` starts before slice `i` ends
    pub noverlaps: u64,
    /// `multiplicity[d]` counts overlapping pairs at distance `j - i == d`
    pub multiplicity: Vec<u64>,
    /// Summed overlap widths over the total value span, counting finite
    /// ranges only; -1 when the element type has no numeric view
    pub ratio: f64,
}

impl OverlapStats {
    /// Compute overlaps of `(first, last)` ranges in slice order
    pub fn compute<T: Element>(ranges: &[(T, T)]) -> Self {
        let n = ranges.len();
        let mut multiplicity = vec![0u64; n];
        let mut noverlaps = 0;
        let mut width = 0.0;

        let numeric: Option<Vec<(f64, f64)>> = ranges
            .iter()
            .map(|(first, last)| Some((first.as_f64()?, last.as_f64()?)))
            .collect();
        let finite = |r: &(f64, f64)| r.0.is_finite() && r.1.is_finite();

        for i in 0..n {
            let end_i = &ranges[i].1;
            for j in i + 1..n {
                if ranges[j].0.sort_cmp(end_i).is_lt() {
                    noverlaps += 1;
                    multiplicity[j - i] += 1;
                    if let Some(numeric) = &numeric {
                        if finite(&numeric[i]) && finite(&numeric[j]) {
                            width += numeric[i].1 - numeric[j].0;
                        }
                    }
                }
            }
        }

        let ratio = match &numeric {
            Some(numeric) => {
                let min = numeric
                    .iter()
                    .filter(|r| finite(r))
                    .map(|r| r.0)
                    .fold(f64::INFINITY, f64::min);
                let max = numeric
                    .iter()
                    .filter(|r| finite(r))
                    .map(|r| r.1)
                    .fold(f64::NEG_INFINITY, f64::max);
                let span = max - min;
                if span.is_finite() && span > 0.0 && width.is_finite() {
                    width / span
                } else {
                    0.0
                }
            }
            None => -1.0,
        };

        Self {
            noverlaps,
            multiplicity,
            ratio,
        }
    }
}

impl fmt::Display for OverlapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spread = self.multiplicity.iter().filter(|&&m| m > 0).count();
        write!(
            f,
            "overlaps={} ratio={:.4} distances={}",
            self.noverlaps, self.ratio, spread
        )
    }
}

/// Overlaps of every complete slice plus the last row
pub fn overlap_stats<T: Element>(store: &SliceStore<T>) -> OverlapStats {
    let mut ranges = store.ranges().to_vec();
    if let Some(last_row) = store.last_row_range() {
        ranges.push(last_row);
    }
    OverlapStats::compute(&ranges)
}

/// One reorder pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStep {
    ChunksMedian,
    SlicesMedian,
    ChunksStart,
    ChunksStop,
}

impl SwapStep {
    fn chunk_key(&self) -> Option<BoundKind> {
        match self {
            SwapStep::ChunksMedian => Some(BoundKind::Median),
            SwapStep::ChunksStart => Some(BoundKind::Start),
            SwapStep::ChunksStop => Some(BoundKind::Stop),
            SwapStep::SlicesMedian => None,
        }
    }

    fn for_flags(flags: ReorderFlags) -> Vec<SwapStep> {
        let mut steps = Vec::new();
        if flags.median {
            steps.push(SwapStep::ChunksMedian);
            steps.push(SwapStep::SlicesMedian);
        }
        if flags.starts {
            steps.push(SwapStep::ChunksStart);
        }
        if flags.stops {
            steps.push(SwapStep::ChunksStop);
        }
        steps
    }
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapStep::ChunksMedian => "chunks/median",
            SwapStep::SlicesMedian => "slices/median",
            SwapStep::ChunksStart => "chunks/start",
            SwapStep::ChunksStop => "chunks/stop",
        };
        write!(f, "{}", name)
    }
}

/// Why an optimization ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// All passes ran
    Completed,
    /// The level runs no passes
    LevelDisabled,
    /// One slice or none
    TooFewSlices,
    FewOverlaps,
    LowOverlapRatio,
    NoImprovement,
    LittleMovement,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::Completed => "completed",
            StopReason::LevelDisabled => "level runs no passes",
            StopReason::TooFewSlices => "too few slices",
            StopReason::FewOverlaps => "few overlapping slices",
            StopReason::LowOverlapRatio => "overlap ratio below threshold",
            StopReason::NoImprovement => "no improvement since last chunk pass",
            StopReason::LittleMovement => "too few elements moved",
        };
        write!(f, "{}", reason)
    }
}

/// Outcome of one reorder pass
#[derive(Debug, Clone)]
pub struct SwapRecord {
    pub pass: u32,
    pub step: SwapStep,
    /// Chunks or slices that changed position
    pub moved: u64,
    /// Chunks or slices eligible for reordering
    pub considered: u64,
    pub committed: bool,
    pub before: OverlapStats,
    pub after: OverlapStats,
}

impl SwapRecord {
    /// `skipped` when nothing moved enough to stage
    pub fn outcome(&self) -> &'static str {
        if self.committed {
            "committed"
        } else if self.moved == 0 {
            "skipped"
        } else {
            "discarded"
        }
    }
}

/// Outcome of one `optimize` call
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    pub level: u8,
    pub flags: ReorderFlags,
    pub baseline: OverlapStats,
    pub result: OverlapStats,
    pub swaps: Vec<SwapRecord>,
    pub stop: StopReason,
}

impl OptimizeReport {
    /// Whether any pass rewrote slices
    pub fn changed(&self) -> bool {
        self.swaps.iter().any(|s| s.committed)
    }
}

impl fmt::Display for OptimizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "level {} ({})", self.level, self.stop)?;
        writeln!(f, "  before: {}", self.baseline)?;
        for swap in &self.swaps {
            writeln!(
                f,
                "  pass {} {:<14} moved {}/{} {} -> {}",
                swap.pass,
                swap.step.to_string(),
                swap.moved,
                swap.considered,
                swap.outcome(),
                swap.after
            )?;
        }
        write!(f, "  after:  {}", self.result)
    }
}

/// Sort a slice's values together with their row numbers
///
/// Row numbers are carried as `u32` offsets from the smallest one when the
/// slice's rows span less than 2^32.
pub(crate) fn sort_slice<T: Element>(values: &[T], indices: &[u64]) -> (Vec<T>, Vec<u64>) {
    let perm = argsort(values);
    let sorted = perm.iter().map(|&p| values[p].clone()).collect();

    let base = indices.iter().copied().min().unwrap_or(0);
    let top = indices.iter().copied().max().unwrap_or(0);
    let rows = if top - base <= u32::MAX as u64 {
        let offsets: Vec<u32> = indices.iter().map(|&i| (i - base) as u32).collect();
        perm.iter().map(|&p| base + offsets[p] as u64).collect()
    } else {
        perm.iter().map(|&p| indices[p]).collect()
    };

    (sorted, rows)
}

/// Count of positions a permutation moves
fn moved(perm: &[usize]) -> usize {
    perm.iter().enumerate().filter(|&(k, &p)| k != p).count()
}

/// One staged slice rewrite
struct Staged<T> {
    slice: u64,
    /// Block (chunk passes) or superblock (slice passes) the rewrite belongs to
    unit: u64,
    range: (T, T),
}

/// Temporary uncompressed copy of rewritten slices
struct Workspace<T: Element> {
    sorted: TypedArray<T>,
    indices: TypedArray<u64>,
    staged: Vec<Staged<T>>,
    /// Units left to commit before an injected failure
    #[cfg(test)]
    fail_after_units: Option<usize>,
    /// Removed on drop, after the arrays above are closed
    dir: TempDir,
}

impl<T: Element> Workspace<T> {
    fn create(store: &SliceStore<T>) -> IndexResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(".optimize-")
            .tempdir_in(store.dir())?;
        let (sorted, indices) = Self::arrays(&dir, store)?;
        Ok(Self {
            sorted,
            indices,
            staged: Vec::new(),
            #[cfg(test)]
            fail_after_units: None,
            dir,
        })
    }

    fn arrays(dir: &TempDir, store: &SliceStore<T>) -> IndexResult<(TypedArray<T>, TypedArray<u64>)> {
        let geometry = store.geometry();
        let ss = geometry.slicesize as usize;
        let cs = geometry.chunksize as usize;
        let compression = Filters::uncompressed().compression;

        let sorted = TypedArray::create(
            dir.path().join("sorted.tmp"),
            store.dtype(),
            ss,
            cs,
            compression,
            store.order(),
        )?;
        let indices = TypedArray::create(
            dir.path().join("indices.tmp"),
            DataType::UInt64,
            ss,
            cs,
            compression,
            store.order(),
        )?;
        Ok((sorted, indices))
    }

    /// Drop everything staged so far
    fn reset(&mut self, store: &SliceStore<T>) -> IndexResult<()> {
        let (sorted, indices) = Self::arrays(&self.dir, store)?;
        self.sorted = sorted;
        self.indices = indices;
        self.staged.clear();
        Ok(())
    }

    fn stage(&mut self, slice: u64, unit: u64, values: &[T], indices: &[u64]) -> IndexResult<()> {
        self.sorted.append_row(values)?;
        self.indices.append_row(indices)?;
        let range = (values[0].clone(), values[values.len() - 1].clone());
        self.staged.push(Staged { slice, unit, range });
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Overlaps the store would have with the staged slices in place
    fn candidate_stats(&self, store: &SliceStore<T>) -> OverlapStats {
        let mut ranges = store.ranges().to_vec();
        for staged in &self.staged {
            ranges[staged.slice as usize] = staged.range.clone();
        }
        if let Some(last_row) = store.last_row_range() {
            ranges.push(last_row);
        }
        OverlapStats::compute(&ranges)
    }

    /// Copy staged slices back into the store one unit at a time
    ///
    /// A unit is read completely from the workspace before any of its slices
    /// is written, and the store is synced after each unit. An error while
    /// writing a unit can still leave that unit half rewritten; every
    /// earlier unit is complete on disk.
    fn commit(&mut self, store: &mut SliceStore<T>) -> IndexResult<u64> {
        let mut units = 0;
        let mut row = 0;
        while row < self.staged.len() {
            let unit = self.staged[row].unit;
            let end = row
                + self.staged[row..]
                    .iter()
                    .take_while(|staged| staged.unit == unit)
                    .count();

            #[cfg(test)]
            if let Some(remaining) = self.fail_after_units.as_mut() {
                if *remaining == 0 {
                    return Err(IndexError::Io(std::io::Error::other("commit interrupted")));
                }
                *remaining -= 1;
            }

            let mut rows = Vec::with_capacity(end - row);
            for r in row..end {
                let values = self.sorted.read_row(r as u64)?;
                let indices = self.indices.read_row(r as u64)?;
                rows.push((self.staged[r].slice, values, indices));
            }
            for (slice, values, indices) in &rows {
                store.rewrite_slice(*slice, values, indices)?;
            }
            store.sync()?;

            units += 1;
            row = end;
        }
        Ok(units)
    }
}

/// Reorders the slices of one store
pub struct Optimizer<'a, T: Element> {
    store: &'a mut SliceStore<T>,
    settings: OptimizerSettings,
    verbose: bool,
    /// Overlaps before the previous chunk pass
    last_chunk_stats: Option<OverlapStats>,
    #[cfg(test)]
    fail_after_units: Option<usize>,
}

impl<'a, T: Element> Optimizer<'a, T> {
    pub fn new(store: &'a mut SliceStore<T>, settings: OptimizerSettings, verbose: bool) -> Self {
        Self {
            store,
            settings,
            verbose,
            last_chunk_stats: None,
            #[cfg(test)]
            fail_after_units: None,
        }
    }

    fn log(&self, message: &str) {
        if self.verbose {
            tracing::info!("{}", message);
        } else {
            tracing::debug!("{}", message);
        }
    }

    /// Run the passes of optimization level `level` (0-9)
    pub fn run(mut self, level: u8) -> IndexResult<OptimizeReport> {
        if level > 9 {
            return Err(IndexError::Precondition(format!(
                "Optimization level must be 0-9, got {}",
                level
            )));
        }

        let flags = ReorderFlags::for_level(level);
        let baseline = overlap_stats(self.store);
        let mut report = OptimizeReport {
            level,
            flags,
            baseline: baseline.clone(),
            result: baseline,
            swaps: Vec::new(),
            stop: StopReason::Completed,
        };

        if self.store.nslices() <= 1 {
            report.stop = StopReason::TooFewSlices;
            return Ok(report);
        }
        if flags.is_empty() {
            report.stop = StopReason::LevelDisabled;
            return Ok(report);
        }

        self.log(&format!(
            "Optimizing {:?} at level {}: {}",
            self.store.dir(),
            level,
            report.baseline
        ));

        let mut workspace = Workspace::create(self.store)?;
        #[cfg(test)]
        {
            workspace.fail_after_units = self.fail_after_units;
        }
        let passes = if flags.full {
            self.settings.full_passes.max(1)
        } else {
            1
        };
        let steps = SwapStep::for_flags(flags);

        'passes: for pass in 0..passes {
            for &step in &steps {
                if step == SwapStep::SlicesMedian && self.store.nblocks() <= 1 {
                    continue;
                }
                if let Some(reason) = self.swap(step, pass, &mut workspace, &mut report)? {
                    report.stop = reason;
                    break 'passes;
                }
            }
        }

        report.result = overlap_stats(self.store);
        self.store.set_dirtycache(true);
        self.log(&format!(
            "Optimized {:?}: {} ({})",
            self.store.dir(),
            report.result,
            report.stop
        ));
        Ok(report)
    }

    /// Run one pass. Returns the reason to stop, if any.
    fn swap(
        &mut self,
        step: SwapStep,
        pass: u32,
        workspace: &mut Workspace<T>,
        report: &mut OptimizeReport,
    ) -> IndexResult<Option<StopReason>> {
        let before = overlap_stats(self.store);

        if before.noverlaps < self.settings.min_overlaps {
            return Ok(Some(StopReason::FewOverlaps));
        }
        if before.ratio >= 0.0 && before.ratio < self.settings.min_overlap_ratio {
            return Ok(Some(StopReason::LowOverlapRatio));
        }

        if step.chunk_key().is_some() {
            if let Some(last) = &self.last_chunk_stats {
                if last.noverlaps > 0 {
                    let count_gain =
                        (last.noverlaps as f64 - before.noverlaps as f64) / last.noverlaps as f64;
                    // Without a usable ratio the count decides alone
                    let ratio_improved = last.ratio > 0.0
                        && before.ratio >= 0.0
                        && (last.ratio - before.ratio) / last.ratio >= self.settings.min_improvement;
                    if count_gain < self.settings.min_improvement && !ratio_improved {
                        return Ok(Some(StopReason::NoImprovement));
                    }
                }
            }
            self.last_chunk_stats = Some(before.clone());
        }

        workspace.reset(self.store)?;
        let (moved, considered) = match step.chunk_key() {
            Some(kind) => self.stage_chunks(kind, workspace)?,
            None => self.stage_slices(workspace)?,
        };

        let mut after = before.clone();
        let mut committed = false;
        if !workspace.is_empty() {
            let candidate = workspace.candidate_stats(self.store);
            if candidate.noverlaps <= before.noverlaps {
                let units = workspace.commit(self.store)?;
                tracing::debug!("Committed {} pass in {} units", step, units);
                after = candidate;
                committed = true;
            } else {
                tracing::warn!(
                    "Discarding {} pass on {:?}: overlaps would grow from {} to {}",
                    step,
                    self.store.dir(),
                    before.noverlaps,
                    candidate.noverlaps
                );
            }
        }

        self.log(&format!(
            "Pass {} {}: moved {}/{}, {} -> {}",
            pass, step, moved, considered, before, after
        ));
        report.swaps.push(SwapRecord {
            pass,
            step,
            moved,
            considered,
            committed,
            before,
            after,
        });

        if considered > 0 && (moved as f64) < self.settings.min_moved_chunks * considered as f64 {
            return Ok(Some(StopReason::LittleMovement));
        }
        Ok(None)
    }

    /// Stage every full block whose chunks, ordered by `kind`, move enough
    fn stage_chunks(&mut self, kind: BoundKind, workspace: &mut Workspace<T>) -> IndexResult<(u64, u64)> {
        let geometry = *self.store.geometry();
        let cs = geometry.chunksize as usize;
        let ncs = geometry.nchunkslice() as usize;
        let nsb = geometry.nslicesblock() as usize;
        let full_blocks = self.store.nrows() as usize / nsb;

        let keys = self.store.read_chunk_bounds(kind)?;
        let (mut moved_total, mut considered) = (0u64, 0u64);

        for block in 0..full_blocks {
            let first = block * nsb;
            let block_keys: Vec<T> = keys[first..first + nsb].iter().flatten().cloned().collect();
            let perm = argsort(&block_keys);
            let ndiff = moved(&perm);
            considered += perm.len() as u64;

            if (ndiff as f64) < self.settings.min_moved_chunks * perm.len() as f64 {
                continue;
            }
            moved_total += ndiff as u64;

            let mut values = Vec::with_capacity(nsb);
            let mut rows = Vec::with_capacity(nsb);
            for slice in first..first + nsb {
                values.push(self.store.read_slice(slice as u64)?);
                rows.push(self.store.read_indices(slice as u64)?);
            }

            for target in 0..nsb {
                let mut new_values = Vec::with_capacity(ncs * cs);
                let mut new_rows = Vec::with_capacity(ncs * cs);
                for &source in &perm[target * ncs..(target + 1) * ncs] {
                    let (slice, chunk) = (source / ncs, source % ncs);
                    let span = chunk * cs..(chunk + 1) * cs;
                    new_values.extend_from_slice(&values[slice][span.clone()]);
                    new_rows.extend_from_slice(&rows[slice][span]);
                }
                let (sorted, indices) = sort_slice(&new_values, &new_rows);
                workspace.stage((first + target) as u64, block as u64, &sorted, &indices)?;
            }
        }

        Ok((moved_total, considered))
    }

    /// Stage every superblock whose slices, ordered by median, move enough
    fn stage_slices(&mut self, workspace: &mut Workspace<T>) -> IndexResult<(u64, u64)> {
        let nss = self.store.geometry().nslicessuperblock() as usize;
        let nrows = self.store.nrows() as usize;

        let keys = self.store.read_mranges()?;
        let (mut moved_total, mut considered) = (0u64, 0u64);

        for superblock in 0..self.store.nsuperblocks() as usize {
            let first = superblock * nss;
            let last = (first + nss).min(nrows);
            if last - first <= 1 {
                continue;
            }

            let perm = argsort(&keys[first..last]);
            let ndiff = moved(&perm);
            considered += perm.len() as u64;

            if (ndiff as f64) < self.settings.min_moved_slices * perm.len() as f64 {
                continue;
            }
            moved_total += ndiff as u64;

            for (target, &source) in perm.iter().enumerate() {
                if target == source {
                    continue;
                }
                let values = self.store.read_slice((first + source) as u64)?;
                let rows = self.store.read_indices((first + source) as u64)?;
                workspace.stage((first + target) as u64, superblock as u64, &values, &rows)?;
            }
        }

        Ok((moved_total, considered))
    }
}
