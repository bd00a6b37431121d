//! Index geometry
//!
//! Chunk, slice, block and superblock sizes are fixed when an index is
//! created and never change afterwards. Every size is a power of two and
//! divides the next one.

use crate::storage::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fan-out settings used to derive a geometry from an expected row count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryBudget {
    /// Chunks per slice
    pub chunks_per_slice: u64,
    /// Slices per block
    pub slices_per_block: u64,
    /// Blocks per superblock
    pub blocks_per_superblock: u64,
}

impl Default for GeometryBudget {
    fn default() -> Self {
        Self {
            chunks_per_slice: 16,
            slices_per_block: 16,
            blocks_per_superblock: 8,
        }
    }
}

/// Fixed layout constants of one index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Elements per chunk
    pub chunksize: u64,
    /// Elements per slice
    pub slicesize: u64,
    /// Elements per block
    pub blocksize: u64,
    /// Elements per superblock
    pub superblocksize: u64,
}

/// Chunk byte budget for an expected row count
fn chunk_bytes(expected_rows: u64) -> u64 {
    match expected_rows {
        0..=100_000 => 1024,
        100_001..=1_000_000 => 2 * 1024,
        1_000_001..=10_000_000 => 4 * 1024,
        _ => 8 * 1024,
    }
}

/// Largest power of two that is `<= n` (at least 1)
fn floor_power_of_two(n: u64) -> u64 {
    if n <= 1 {
        1
    } else {
        1 << (63 - n.leading_zeros())
    }
}

impl Geometry {
    /// Build a geometry from explicit fan-outs
    pub fn new(
        chunksize: u64,
        chunks_per_slice: u64,
        slices_per_block: u64,
        blocks_per_superblock: u64,
    ) -> IndexResult<Self> {
        for (name, value) in [
            ("chunksize", chunksize),
            ("chunks per slice", chunks_per_slice),
            ("slices per block", slices_per_block),
            ("blocks per superblock", blocks_per_superblock),
        ] {
            if !value.is_power_of_two() {
                return Err(IndexError::Precondition(format!(
                    "{} must be a power of two, got {}",
                    name, value
                )));
            }
        }

        let slicesize = chunksize
            .checked_mul(chunks_per_slice)
            .ok_or_else(|| IndexError::Precondition("slicesize overflows".into()))?;
        let blocksize = slicesize
            .checked_mul(slices_per_block)
            .ok_or_else(|| IndexError::Precondition("blocksize overflows".into()))?;
        let superblocksize = blocksize
            .checked_mul(blocks_per_superblock)
            .ok_or_else(|| IndexError::Precondition("superblocksize overflows".into()))?;

        Ok(Self {
            chunksize,
            slicesize,
            blocksize,
            superblocksize,
        })
    }

    /// Derive a geometry from the element width and the expected row count
    ///
    /// Wider elements get fewer elements per chunk.
    pub fn compute(itemsize: usize, expected_rows: u64, budget: &GeometryBudget) -> IndexResult<Self> {
        if itemsize == 0 {
            return Err(IndexError::Precondition("itemsize must be positive".into()));
        }
        let chunksize = floor_power_of_two(chunk_bytes(expected_rows) / itemsize as u64);
        Self::new(
            chunksize,
            budget.chunks_per_slice,
            budget.slices_per_block,
            budget.blocks_per_superblock,
        )
    }

    /// Reject geometries whose invariants do not hold (e.g. hand-edited attributes)
    pub fn validate(&self) -> IndexResult<()> {
        let sizes = [self.chunksize, self.slicesize, self.blocksize, self.superblocksize];
        if !sizes.iter().all(|size| size.is_power_of_two()) {
            return Err(IndexError::InvalidFormat(format!(
                "Geometry sizes must be powers of two: {}",
                self
            )));
        }

        let rebuilt = Self::new(
            self.chunksize,
            self.nchunkslice(),
            self.nslicesblock(),
            self.nblockssuperblock(),
        )?;
        if rebuilt != *self {
            return Err(IndexError::InvalidFormat(format!(
                "Inconsistent geometry: {}",
                self
            )));
        }
        Ok(())
    }

    pub fn nchunkslice(&self) -> u64 {
        self.slicesize / self.chunksize
    }

    pub fn nslicesblock(&self) -> u64 {
        self.blocksize / self.slicesize
    }

    pub fn nblockssuperblock(&self) -> u64 {
        self.superblocksize / self.blocksize
    }

    pub fn nslicessuperblock(&self) -> u64 {
        self.superblocksize / self.slicesize
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk={} slice={} block={} superblock={}",
            self.chunksize, self.slicesize, self.blocksize, self.superblocksize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_geometry() {
        let g = Geometry::new(2, 2, 4, 2).unwrap();
        assert_eq!(g.slicesize, 4);
        assert_eq!(g.blocksize, 16);
        assert_eq!(g.superblocksize, 32);
        assert_eq!(g.nchunkslice(), 2);
        assert_eq!(g.nslicesblock(), 4);
        assert_eq!(g.nblockssuperblock(), 2);
        assert_eq!(g.nslicessuperblock(), 8);
        g.validate().unwrap();
    }

    #[test]
    fn test_rejects_non_powers_of_two() {
        assert!(Geometry::new(3, 2, 2, 2).is_err());
        assert!(Geometry::new(2, 0, 2, 2).is_err());
    }

    #[test]
    fn test_wider_types_get_smaller_chunks() {
        let budget = GeometryBudget::default();
        let narrow = Geometry::compute(4, 1_000, &budget).unwrap();
        let wide = Geometry::compute(8, 1_000, &budget).unwrap();
        assert_eq!(narrow.chunksize, 256);
        assert_eq!(wide.chunksize, 128);

        let big = Geometry::compute(8, 50_000_000, &budget).unwrap();
        assert_eq!(big.chunksize, 1024);

        // Odd widths round down to a power of two
        let odd = Geometry::compute(3, 1_000, &budget).unwrap();
        assert_eq!(odd.chunksize, 256);
        assert!(odd.slicesize % odd.chunksize == 0);
        assert!(odd.superblocksize % odd.blocksize == 0);
    }

    #[test]
    fn test_validate_catches_broken_attributes() {
        let g = Geometry {
            chunksize: 4,
            slicesize: 12,
            blocksize: 24,
            superblocksize: 48,
        };
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let good = Geometry::new(2, 2, 2, 2).unwrap();
        for broken in [
            Geometry { chunksize: 0, ..good },
            Geometry { slicesize: 0, ..good },
            Geometry { blocksize: 0, ..good },
            Geometry { superblocksize: 0, ..good },
        ] {
            assert!(matches!(broken.validate(), Err(IndexError::InvalidFormat(_))));
        }

        // Shrinking sizes divide to zero fan-outs
        let shrinking = Geometry {
            chunksize: 8,
            slicesize: 4,
            blocksize: 4,
            superblocksize: 4,
        };
        assert!(shrinking.validate().is_err());
    }
}
