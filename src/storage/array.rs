//! Array file format for index storage
//!
//! An array file stores a growing sequence of fixed-length rows of
//! fixed-width elements. Rows are split into chunks and every chunk is an
//! independent, checksummed, optionally compressed block, so a range read
//! only decodes the chunks it touches.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "CIXA"               │
//! │   version: u16                          │
//! │   itemsize: u32                         │
//! │   row_len: u32                          │
//! │   chunk_len: u32                        │
//! │   nrows: u64                            │
//! │   data_end: u64                         │
//! │   garbage: u64                          │
//! │   compression: u8                       │
//! │   reserved: [u8; 17]                    │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ BLOCKS (variable)                       │
//! │   For each (row, chunk):                │
//! │     payload: [u8; size]                 │
//! │     block_checksum: u32                 │
//! ├─────────────────────────────────────────┤
//! │ FOOTER (at data_end)                    │
//! │   block_table: bincode Vec<Vec<BlockRef>>│
//! │   footer_size: u32                      │
//! │   footer_checksum: u32                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Overwriting a row reuses a block's space when the new payload fits its
//! capacity and relocates the block to the end otherwise. Relocated space is
//! counted as garbage and reclaimed by compaction.

use crate::storage::compression::{compress_chunk, decompress_chunk, Compression};
use crate::storage::error::{IndexError, IndexResult};
use crate::storage::types::{decode_all, encode_all, ByteOrder, DataType, Element};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Magic bytes for array file identification
const ARRAY_MAGIC: [u8; 4] = *b"CIXA";

/// Current array format version
const ARRAY_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 64;

/// Bytes following every block payload (crc32)
const BLOCK_TRAILER: u64 = 4;

/// Array file header
#[derive(Debug, Clone)]
pub struct ArrayHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Bytes per element
    pub itemsize: u32,
    /// Elements per row
    pub row_len: u32,
    /// Elements per chunk block
    pub chunk_len: u32,
    pub nrows: u64,
    /// End of the block region; the footer starts here
    pub data_end: u64,
    /// Bytes of relocated blocks still occupying the block region
    pub garbage: u64,
    pub compression: Compression,
}

impl ArrayHeader {
    fn new(itemsize: u32, row_len: u32, chunk_len: u32, compression: Compression) -> Self {
        Self {
            magic: ARRAY_MAGIC,
            version: ARRAY_VERSION,
            itemsize,
            row_len,
            chunk_len,
            nrows: 0,
            data_end: HEADER_SIZE as u64,
            garbage: 0,
            compression,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.itemsize.to_le_bytes());
        buf[10..14].copy_from_slice(&self.row_len.to_le_bytes());
        buf[14..18].copy_from_slice(&self.chunk_len.to_le_bytes());
        buf[18..26].copy_from_slice(&self.nrows.to_le_bytes());
        buf[26..34].copy_from_slice(&self.data_end.to_le_bytes());
        buf[34..42].copy_from_slice(&self.garbage.to_le_bytes());
        buf[42] = self.compression as u8;
        // bytes 43-59 reserved

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> IndexResult<Self> {
        let stored_checksum = u32::from_le_bytes([buf[60], buf[61], buf[62], buf[63]]);
        let computed_checksum = crc32fast::hash(&buf[0..60]);

        if stored_checksum != computed_checksum {
            return Err(IndexError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != ARRAY_MAGIC {
            return Err(IndexError::InvalidFormat(format!("Invalid magic: {:?}", magic)));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > ARRAY_VERSION {
            return Err(IndexError::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        Ok(Self {
            magic,
            version,
            itemsize: u32_at(6),
            row_len: u32_at(10),
            chunk_len: u32_at(14),
            nrows: u64_at(18),
            data_end: u64_at(26),
            garbage: u64_at(34),
            compression: Compression::try_from(buf[42])?,
        })
    }

    fn chunks_per_row(&self) -> usize {
        if self.row_len == 0 {
            0
        } else {
            (self.row_len as usize).div_ceil(self.chunk_len as usize)
        }
    }

    /// Element count of chunk `chunk` (the last chunk of a row may be short)
    fn chunk_elements(&self, chunk: usize) -> usize {
        let start = chunk * self.chunk_len as usize;
        (self.row_len as usize - start).min(self.chunk_len as usize)
    }
}

/// Location of one chunk block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Offset from start of file
    pub offset: u64,
    /// Size of the stored payload
    pub size: u32,
    /// Payload bytes available at `offset` for in-place rewrites
    pub capacity: u32,
}

/// A file of fixed-length rows stored as chunk blocks
pub struct ArrayFile {
    path: PathBuf,
    header: ArrayHeader,
    /// Block table: one entry per chunk, per row
    blocks: Vec<Vec<BlockRef>>,
    file: File,
    /// Footer/header need rewriting
    dirty: bool,
}

impl ArrayFile {
    /// Create a new, empty array file (truncating any existing file)
    pub fn create(
        path: impl AsRef<Path>,
        itemsize: usize,
        row_len: usize,
        chunk_len: usize,
        compression: Compression,
    ) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        if itemsize == 0 || chunk_len == 0 {
            return Err(IndexError::Precondition(format!(
                "Array {:?} needs positive itemsize and chunk length",
                path
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut array = Self {
            path,
            header: ArrayHeader::new(itemsize as u32, row_len as u32, chunk_len as u32, compression),
            blocks: Vec::new(),
            file,
            dirty: true,
        };
        array.flush()?;
        Ok(array)
    }

    /// Open an existing array file
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = ArrayHeader::from_bytes(&header_buf)?;

        let blocks = Self::read_footer(&mut file, &header)?;

        Ok(Self {
            path,
            header,
            blocks,
            file,
            dirty: false,
        })
    }

    /// Read footer from array file
    fn read_footer(file: &mut File, header: &ArrayHeader) -> IndexResult<Vec<Vec<BlockRef>>> {
        file.seek(SeekFrom::Start(header.data_end))?;

        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;
        if tail.len() < 8 {
            return Err(IndexError::Corruption("Footer truncated".into()));
        }

        let trailer = &tail[tail.len() - 8..];
        let footer_size = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize;
        let stored_checksum = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        if footer_size + 8 != tail.len() {
            return Err(IndexError::Corruption(format!(
                "Footer size mismatch: recorded {}, found {}",
                footer_size,
                tail.len() - 8
            )));
        }

        let footer_data = &tail[..footer_size];
        if crc32fast::hash(footer_data) != stored_checksum {
            return Err(IndexError::Corruption("Footer checksum mismatch".into()));
        }

        let blocks: Vec<Vec<BlockRef>> = bincode::deserialize(footer_data)?;
        if blocks.len() as u64 != header.nrows {
            return Err(IndexError::Corruption(format!(
                "Block table has {} rows, header says {}",
                blocks.len(),
                header.nrows
            )));
        }

        let per_row = header.chunks_per_row();
        if blocks.iter().any(|row| row.len() != per_row) {
            return Err(IndexError::Corruption("Block table row width mismatch".into()));
        }

        Ok(blocks)
    }

    /// Write footer with block table at `data_end`, then the header
    fn write_footer_and_header(&mut self) -> IndexResult<()> {
        let footer_data = bincode::serialize(&self.blocks)?;
        let checksum = crc32fast::hash(&footer_data);

        let mut writer = BufWriter::new(&mut self.file);
        writer.seek(SeekFrom::Start(self.header.data_end))?;
        writer.write_all(&footer_data)?;
        writer.write_all(&(footer_data.len() as u32).to_le_bytes())?;
        writer.write_all(&checksum.to_le_bytes())?;

        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&self.header.to_bytes())?;
        writer.flush()?;
        drop(writer);

        let end = self.header.data_end + footer_data.len() as u64 + 8;
        self.file.set_len(end)?;
        Ok(())
    }

    fn row_bytes(&self) -> usize {
        self.header.row_len as usize * self.header.itemsize as usize
    }

    fn check_row_bytes(&self, raw: &[u8]) -> IndexResult<()> {
        if raw.len() != self.row_bytes() {
            return Err(IndexError::Shape {
                expected: self.header.row_len as u64,
                actual: (raw.len() / self.header.itemsize as usize) as u64,
            });
        }
        Ok(())
    }

    /// Byte range of chunk `chunk` inside an encoded row
    fn chunk_span(&self, chunk: usize) -> (usize, usize) {
        let itemsize = self.header.itemsize as usize;
        let start = chunk * self.header.chunk_len as usize * itemsize;
        (start, start + self.header.chunk_elements(chunk) * itemsize)
    }

    /// Write `payload` + checksum at `offset`
    fn write_block(&mut self, offset: u64, payload: &[u8]) -> IndexResult<()> {
        let checksum = crc32fast::hash(payload);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(payload)?;
        self.file.write_all(&checksum.to_le_bytes())?;
        Ok(())
    }

    /// Append a payload at the end of the block region
    fn push_block(&mut self, payload: &[u8]) -> IndexResult<BlockRef> {
        let offset = self.header.data_end;
        self.write_block(offset, payload)?;
        self.header.data_end += payload.len() as u64 + BLOCK_TRAILER;
        Ok(BlockRef {
            offset,
            size: payload.len() as u32,
            capacity: payload.len() as u32,
        })
    }

    /// Append one encoded row
    pub fn append_row(&mut self, raw: &[u8]) -> IndexResult<u64> {
        self.check_row_bytes(raw)?;

        let mut refs = Vec::with_capacity(self.header.chunks_per_row());
        for chunk in 0..self.header.chunks_per_row() {
            let (start, end) = self.chunk_span(chunk);
            let payload = compress_chunk(&raw[start..end], self.header.compression);
            refs.push(self.push_block(&payload)?);
        }

        self.blocks.push(refs);
        self.header.nrows += 1;
        self.dirty = true;
        Ok(self.header.nrows - 1)
    }

    /// Overwrite an existing row
    pub fn write_row(&mut self, row: u64, raw: &[u8]) -> IndexResult<()> {
        self.check_row_bytes(raw)?;
        if row >= self.header.nrows {
            return Err(IndexError::Precondition(format!(
                "Row {} out of range ({} rows in {:?})",
                row, self.header.nrows, self.path
            )));
        }

        for chunk in 0..self.header.chunks_per_row() {
            let (start, end) = self.chunk_span(chunk);
            let payload = compress_chunk(&raw[start..end], self.header.compression);
            let current = self.blocks[row as usize][chunk];

            let updated = if payload.len() as u32 <= current.capacity {
                self.write_block(current.offset, &payload)?;
                BlockRef {
                    size: payload.len() as u32,
                    ..current
                }
            } else {
                self.header.garbage += current.capacity as u64 + BLOCK_TRAILER;
                self.push_block(&payload)?
            };
            self.blocks[row as usize][chunk] = updated;
        }

        self.dirty = true;
        Ok(())
    }

    /// Read and decode one chunk block
    fn read_chunk(&mut self, row: usize, chunk: usize) -> IndexResult<Vec<u8>> {
        let block = self.blocks[row][chunk];

        self.file.seek(SeekFrom::Start(block.offset))?;
        let mut data = vec![0u8; block.size as usize + BLOCK_TRAILER as usize];
        self.file.read_exact(&mut data)?;

        let (payload, trailer) = data.split_at(block.size as usize);
        let stored_checksum = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(payload) != stored_checksum {
            return Err(IndexError::Corruption(format!(
                "Block ({}, {}) checksum mismatch in {:?}",
                row, chunk, self.path
            )));
        }

        let expected = self.header.chunk_elements(chunk) * self.header.itemsize as usize;
        decompress_chunk(payload, self.header.compression, expected)
    }

    /// Read elements `[start, end)` of a row, decoding only overlapping chunks
    pub fn read_range(&mut self, row: u64, start: usize, end: usize) -> IndexResult<Vec<u8>> {
        let row_len = self.header.row_len as usize;
        if row >= self.header.nrows || start > end || end > row_len {
            return Err(IndexError::Precondition(format!(
                "Range {}..{} of row {} out of bounds ({} rows x {} in {:?})",
                start, end, row, self.header.nrows, row_len, self.path
            )));
        }
        if start == end {
            return Ok(Vec::new());
        }

        let itemsize = self.header.itemsize as usize;
        let chunk_len = self.header.chunk_len as usize;
        let first = start / chunk_len;
        let last = (end - 1) / chunk_len;

        let mut out = Vec::with_capacity((end - start) * itemsize);
        for chunk in first..=last {
            let raw = self.read_chunk(row as usize, chunk)?;
            let chunk_start = chunk * chunk_len;
            let from = start.max(chunk_start) - chunk_start;
            let to = end.min(chunk_start + raw.len() / itemsize) - chunk_start;
            out.extend_from_slice(&raw[from * itemsize..to * itemsize]);
        }
        Ok(out)
    }

    /// Read a complete row
    pub fn read_row(&mut self, row: u64) -> IndexResult<Vec<u8>> {
        let row_len = self.header.row_len as usize;
        self.read_range(row, 0, row_len)
    }

    /// Persist the block table and header, compacting when garbage dominates
    pub fn flush(&mut self) -> IndexResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let live = self.header.data_end - HEADER_SIZE as u64;
        if self.header.garbage > 0 && self.header.garbage * 2 > live {
            self.compact()?;
        }

        self.write_footer_and_header()?;
        self.dirty = false;
        Ok(())
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> IndexResult<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Rewrite all live blocks contiguously into a fresh file
    fn compact(&mut self) -> IndexResult<()> {
        let tmp_path = self.path.with_extension("compact");
        tracing::debug!(
            "Compacting {:?}: {} garbage bytes of {}",
            self.path,
            self.header.garbage,
            self.header.data_end
        );

        let mut out = BufWriter::new(File::create(&tmp_path)?);
        out.write_all(&[0u8; HEADER_SIZE])?;

        let mut offset = HEADER_SIZE as u64;
        let mut relocated = Vec::with_capacity(self.blocks.len());
        for row in 0..self.blocks.len() {
            let mut refs = Vec::with_capacity(self.blocks[row].len());
            for block in self.blocks[row].clone() {
                let mut data = vec![0u8; block.size as usize + BLOCK_TRAILER as usize];
                self.file.seek(SeekFrom::Start(block.offset))?;
                self.file.read_exact(&mut data)?;
                out.write_all(&data)?;
                refs.push(BlockRef {
                    offset,
                    size: block.size,
                    capacity: block.size,
                });
                offset += data.len() as u64;
            }
            relocated.push(refs);
        }
        out.flush()?;
        drop(out);

        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.blocks = relocated;
        self.header.data_end = offset;
        self.header.garbage = 0;
        Ok(())
    }

    pub fn nrows(&self) -> u64 {
        self.header.nrows
    }

    pub fn row_len(&self) -> usize {
        self.header.row_len as usize
    }

    pub fn itemsize(&self) -> usize {
        self.header.itemsize as usize
    }

    pub fn header(&self) -> &ArrayHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An array file of typed elements
pub struct TypedArray<T: Element> {
    file: ArrayFile,
    order: ByteOrder,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> TypedArray<T> {
    pub fn create(
        path: impl AsRef<Path>,
        dtype: DataType,
        row_len: usize,
        chunk_len: usize,
        compression: Compression,
        order: ByteOrder,
    ) -> IndexResult<Self> {
        let chunk_len = chunk_len.min(row_len).max(1);
        Ok(Self {
            file: ArrayFile::create(path, dtype.itemsize(), row_len, chunk_len, compression)?,
            order,
            _marker: PhantomData,
        })
    }

    /// Open an array, checking that it stores elements of `dtype`
    pub fn open(path: impl AsRef<Path>, dtype: DataType, order: ByteOrder) -> IndexResult<Self> {
        let file = ArrayFile::open(path)?;
        if file.itemsize() != dtype.itemsize() {
            return Err(IndexError::InvalidFormat(format!(
                "{:?} stores {}-byte items, expected {} ({})",
                file.path(),
                file.itemsize(),
                dtype.itemsize(),
                dtype
            )));
        }
        Ok(Self {
            file,
            order,
            _marker: PhantomData,
        })
    }

    fn encode(&self, values: &[T]) -> Vec<u8> {
        encode_all(values, self.order, self.file.itemsize())
    }

    fn decode(&self, bytes: &[u8]) -> Vec<T> {
        decode_all(bytes, self.order, self.file.itemsize())
    }

    pub fn append_row(&mut self, values: &[T]) -> IndexResult<u64> {
        let raw = self.encode(values);
        self.file.append_row(&raw)
    }

    pub fn write_row(&mut self, row: u64, values: &[T]) -> IndexResult<()> {
        let raw = self.encode(values);
        self.file.write_row(row, &raw)
    }

    pub fn read_row(&mut self, row: u64) -> IndexResult<Vec<T>> {
        let raw = self.file.read_row(row)?;
        Ok(self.decode(&raw))
    }

    pub fn read_range(&mut self, row: u64, start: usize, end: usize) -> IndexResult<Vec<T>> {
        let raw = self.file.read_range(row, start, end)?;
        Ok(self.decode(&raw))
    }

    /// Read every row
    pub fn read_all(&mut self) -> IndexResult<Vec<Vec<T>>> {
        (0..self.file.nrows()).map(|row| self.read_row(row)).collect()
    }

    pub fn nrows(&self) -> u64 {
        self.file.nrows()
    }

    pub fn row_len(&self) -> usize {
        self.file.row_len()
    }

    pub fn flush(&mut self) -> IndexResult<()> {
        self.file.flush()
    }

    pub fn sync(&mut self) -> IndexResult<()> {
        self.file.sync()
    }

    pub fn raw(&self) -> &ArrayFile {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_array_header_roundtrip() {
        let mut header = ArrayHeader::new(8, 64, 16, Compression::Lz4);
        header.nrows = 5;
        header.data_end = 4096;
        header.garbage = 12;

        let bytes = header.to_bytes();
        let restored = ArrayHeader::from_bytes(&bytes).unwrap();

        assert_eq!(restored.magic, ARRAY_MAGIC);
        assert_eq!(restored.version, ARRAY_VERSION);
        assert_eq!(restored.itemsize, 8);
        assert_eq!(restored.row_len, 64);
        assert_eq!(restored.chunk_len, 16);
        assert_eq!(restored.nrows, 5);
        assert_eq!(restored.data_end, 4096);
        assert_eq!(restored.garbage, 12);
        assert_eq!(restored.compression, Compression::Lz4);
    }

    #[test]
    fn test_header_checksum_detects_corruption() {
        let mut bytes = ArrayHeader::new(4, 8, 4, Compression::None).to_bytes();
        bytes[20] ^= 0xFF;
        assert!(matches!(
            ArrayHeader::from_bytes(&bytes),
            Err(IndexError::Corruption(_))
        ));
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("values.cia");

        {
            let mut array: TypedArray<i64> =
                TypedArray::create(&path, DataType::Int64, 8, 4, Compression::Lz4, ByteOrder::Little)
                    .unwrap();
            for row in 0..3i64 {
                let values: Vec<i64> = (0..8).map(|i| row * 100 + i).collect();
                array.append_row(&values).unwrap();
            }
            array.flush().unwrap();
            assert_eq!(array.nrows(), 3);
        }

        {
            let mut array: TypedArray<i64> =
                TypedArray::open(&path, DataType::Int64, ByteOrder::Little).unwrap();
            assert_eq!(array.nrows(), 3);
            assert_eq!(array.read_row(1).unwrap(), (100..108).collect::<Vec<i64>>());
            // Range spanning the chunk boundary at 4
            assert_eq!(array.read_range(2, 3, 6).unwrap(), vec![203, 204, 205]);
            assert!(array.read_range(2, 6, 9).is_err());
        }
    }

    #[test]
    fn test_wrong_row_length_is_shape_error() {
        let dir = tempdir().unwrap();
        let mut array: TypedArray<i32> = TypedArray::create(
            dir.path().join("a.cia"),
            DataType::Int32,
            4,
            2,
            Compression::None,
            ByteOrder::Little,
        )
        .unwrap();

        let err = array.append_row(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, IndexError::Shape { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_overwrite_in_place_and_relocated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.cia");

        let mut array: TypedArray<u64> =
            TypedArray::create(&path, DataType::UInt64, 256, 256, Compression::Lz4, ByteOrder::Little)
                .unwrap();

        // Highly compressible row, then an incompressible one forces relocation
        array.append_row(&vec![7u64; 256]).unwrap();
        array.append_row(&vec![1u64; 256]).unwrap();
        array.flush().unwrap();

        let noisy: Vec<u64> = (0..256u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect();
        array.write_row(0, &noisy).unwrap();
        array.write_row(1, &vec![2u64; 256]).unwrap();
        array.flush().unwrap();

        assert_eq!(array.read_row(0).unwrap(), noisy);
        assert_eq!(array.read_row(1).unwrap(), vec![2u64; 256]);

        drop(array);
        let mut reopened: TypedArray<u64> =
            TypedArray::open(&path, DataType::UInt64, ByteOrder::Little).unwrap();
        assert_eq!(reopened.read_row(0).unwrap(), noisy);
        assert_eq!(reopened.read_row(1).unwrap(), vec![2u64; 256]);
    }

    #[test]
    fn test_repeated_rewrites_are_compacted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lr.cia");

        let mut array: TypedArray<u32> =
            TypedArray::create(&path, DataType::UInt32, 64, 16, Compression::Lz4, ByteOrder::Big)
                .unwrap();
        array.append_row(&vec![0u32; 64]).unwrap();

        for round in 0..50u32 {
            let values: Vec<u32> = (0..64).map(|i| i * 7919 + round).collect();
            array.write_row(0, &values).unwrap();
            array.flush().unwrap();
            assert_eq!(array.read_row(0).unwrap(), values);
        }

        let header = array.raw().header();
        assert!(header.garbage * 2 <= header.data_end);
    }

    #[test]
    fn test_zero_width_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bounds.cia");

        let mut array: TypedArray<f64> =
            TypedArray::create(&path, DataType::Float64, 0, 4, Compression::Lz4, ByteOrder::Little)
                .unwrap();
        array.append_row(&[]).unwrap();
        array.append_row(&[]).unwrap();
        array.flush().unwrap();

        let mut reopened: TypedArray<f64> =
            TypedArray::open(&path, DataType::Float64, ByteOrder::Little).unwrap();
        assert_eq!(reopened.nrows(), 2);
        assert!(reopened.read_row(1).unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_wrong_itemsize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.cia");
        TypedArray::<i32>::create(&path, DataType::Int32, 4, 4, Compression::None, ByteOrder::Little)
            .unwrap();

        assert!(TypedArray::<i64>::open(&path, DataType::Int64, ByteOrder::Little).is_err());
    }
}
