//! Core data types for the index storage layer
//!
//! This module defines the element types an index can be built over:
//! - `DataType`: the persisted type tag (kind + byte width)
//! - `ByteOrder`: on-disk byte order of encoded elements
//! - `Element`: trait implemented by every indexable Rust type
//! - `FixedBytes`: fixed-width byte strings
//! - `Scalar`: a dynamically typed literal, used at the untyped edges

use crate::index::limits;
use crate::storage::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Element data type of an indexed column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Fixed-width byte string of the given width
    Bytes(usize),
}

impl DataType {
    /// Parse a type name such as `int32`, `float64`, `bytes16` or `S16`
    pub fn parse(name: &str) -> IndexResult<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let dtype = match lowered.as_str() {
            "int8" => DataType::Int8,
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "uint16" => DataType::UInt16,
            "uint32" => DataType::UInt32,
            "uint64" => DataType::UInt64,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            other => {
                let width = other
                    .strip_prefix("bytes")
                    .or_else(|| other.strip_prefix('s'))
                    .and_then(|w| w.parse::<usize>().ok())
                    .filter(|w| *w > 0);
                match width {
                    Some(w) => DataType::Bytes(w),
                    None => return Err(IndexError::UnsupportedType(name.to_string())),
                }
            }
        };
        Ok(dtype)
    }

    /// Width of one encoded element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
            DataType::Bytes(w) => *w,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::UInt8 => write!(f, "uint8"),
            DataType::UInt16 => write!(f, "uint16"),
            DataType::UInt32 => write!(f, "uint32"),
            DataType::UInt64 => write!(f, "uint64"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Bytes(w) => write!(f, "bytes{}", w),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DataType::parse(&value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

/// Byte order of encoded elements on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the running machine
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::native()
    }
}

impl std::str::FromStr for ByteOrder {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" => Ok(ByteOrder::Little),
            "big" => Ok(ByteOrder::Big),
            "native" => Ok(ByteOrder::native()),
            other => Err(IndexError::Config(format!("Unknown byte order: {}", other))),
        }
    }
}

/// A dynamically typed literal
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

/// A type that can be stored in, and searched through, an index
///
/// `ACCELERATED` types use the hierarchical search over the per-chunk
/// bounds cache; every other type is searched with a plain per-slice bisect.
pub trait Element: Clone + PartialOrd + fmt::Debug + Send + Sync + 'static {
    const ACCELERATED: bool = false;

    /// Persisted type tag for elements of width `itemsize`
    fn data_type(itemsize: usize) -> DataType;

    fn encode(&self, order: ByteOrder, itemsize: usize, out: &mut Vec<u8>);

    /// Decode from exactly one element's worth of bytes
    fn decode(buf: &[u8], order: ByteOrder) -> Self;

    /// Total order used for sorting. NaN sorts last.
    fn sort_cmp(&self, other: &Self) -> Ordering;

    /// Next representable value in `direction` (`<0`, `0`, `>0`)
    fn next_representable(&self, direction: i32) -> Self;

    /// Minimum (`sign < 0`) or maximum (`sign > 0`) value of the type
    fn sentinel(sign: i32, itemsize: usize) -> Self;

    /// Numeric view used for overlap ratios. `None` for byte strings.
    fn as_f64(&self) -> Option<f64>;

    /// Parse a literal as given on a command line
    fn parse_literal(text: &str, itemsize: usize) -> IndexResult<Self>;
}

macro_rules! int_element {
    ($t:ty, $dtype:ident, $accel:expr) => {
        impl Element for $t {
            const ACCELERATED: bool = $accel;

            fn data_type(_itemsize: usize) -> DataType {
                DataType::$dtype
            }

            fn encode(&self, order: ByteOrder, _itemsize: usize, out: &mut Vec<u8>) {
                match order {
                    ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                    ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                }
            }

            fn decode(buf: &[u8], order: ByteOrder) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&buf[..std::mem::size_of::<$t>()]);
                match order {
                    ByteOrder::Little => <$t>::from_le_bytes(raw),
                    ByteOrder::Big => <$t>::from_be_bytes(raw),
                }
            }

            fn sort_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }

            fn next_representable(&self, direction: i32) -> Self {
                limits::step_int(*self, direction)
            }

            fn sentinel(sign: i32, _itemsize: usize) -> Self {
                if sign < 0 {
                    <$t>::MIN
                } else {
                    <$t>::MAX
                }
            }

            fn as_f64(&self) -> Option<f64> {
                Some(*self as f64)
            }

            fn parse_literal(text: &str, _itemsize: usize) -> IndexResult<Self> {
                text.trim().parse::<$t>().map_err(|e| {
                    IndexError::Precondition(format!(
                        "Invalid {} literal {:?}: {}",
                        DataType::$dtype,
                        text,
                        e
                    ))
                })
            }
        }
    };
}

int_element!(i8, Int8, false);
int_element!(i16, Int16, false);
int_element!(i32, Int32, true);
int_element!(i64, Int64, true);
int_element!(u8, UInt8, false);
int_element!(u16, UInt16, false);
int_element!(u32, UInt32, false);
int_element!(u64, UInt64, false);

macro_rules! float_element {
    ($t:ty, $dtype:ident, $next:path) => {
        impl Element for $t {
            const ACCELERATED: bool = true;

            fn data_type(_itemsize: usize) -> DataType {
                DataType::$dtype
            }

            fn encode(&self, order: ByteOrder, _itemsize: usize, out: &mut Vec<u8>) {
                match order {
                    ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                    ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                }
            }

            fn decode(buf: &[u8], order: ByteOrder) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&buf[..std::mem::size_of::<$t>()]);
                match order {
                    ByteOrder::Little => <$t>::from_le_bytes(raw),
                    ByteOrder::Big => <$t>::from_be_bytes(raw),
                }
            }

            fn sort_cmp(&self, other: &Self) -> Ordering {
                match (self.is_nan(), other.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => self.partial_cmp(other).unwrap_or(Ordering::Equal),
                }
            }

            fn next_representable(&self, direction: i32) -> Self {
                $next(*self, direction)
            }

            fn sentinel(sign: i32, _itemsize: usize) -> Self {
                if sign < 0 {
                    <$t>::NEG_INFINITY
                } else {
                    <$t>::INFINITY
                }
            }

            fn as_f64(&self) -> Option<f64> {
                Some(*self as f64)
            }

            fn parse_literal(text: &str, _itemsize: usize) -> IndexResult<Self> {
                text.trim().parse::<$t>().map_err(|e| {
                    IndexError::Precondition(format!(
                        "Invalid {} literal {:?}: {}",
                        DataType::$dtype,
                        text,
                        e
                    ))
                })
            }
        }
    };
}

float_element!(f32, Float32, limits::next_after_f32);
float_element!(f64, Float64, limits::next_after_f64);

/// Fixed-width byte string, ordered lexicographically
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedBytes(Vec<u8>);

impl FixedBytes {
    /// Build from raw bytes, NUL-padding or truncating to `itemsize`
    pub fn new(bytes: &[u8], itemsize: usize) -> Self {
        let mut buf = vec![0u8; itemsize];
        let take = bytes.len().min(itemsize);
        buf[..take].copy_from_slice(&bytes[..take]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn itemsize(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for FixedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0)
            .map(|p| p + 1)
            .unwrap_or(0);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

impl Element for FixedBytes {
    fn data_type(itemsize: usize) -> DataType {
        DataType::Bytes(itemsize)
    }

    fn encode(&self, _order: ByteOrder, itemsize: usize, out: &mut Vec<u8>) {
        let take = self.0.len().min(itemsize);
        out.extend_from_slice(&self.0[..take]);
        out.resize(out.len() + (itemsize - take), 0);
    }

    fn decode(buf: &[u8], _order: ByteOrder) -> Self {
        Self(buf.to_vec())
    }

    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }

    fn next_representable(&self, direction: i32) -> Self {
        let mut buf = self.0.clone();
        limits::step_bytes(&mut buf, direction);
        Self(buf)
    }

    fn sentinel(sign: i32, itemsize: usize) -> Self {
        Self(limits::bytes_sentinel(itemsize, sign))
    }

    fn as_f64(&self) -> Option<f64> {
        None
    }

    fn parse_literal(text: &str, itemsize: usize) -> IndexResult<Self> {
        if text.len() > itemsize {
            return Err(IndexError::Precondition(format!(
                "Literal {:?} is wider than {} bytes",
                text, itemsize
            )));
        }
        Ok(Self::new(text.as_bytes(), itemsize))
    }
}

/// Encode a run of elements
pub fn encode_all<T: Element>(values: &[T], order: ByteOrder, itemsize: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * itemsize);
    for value in values {
        value.encode(order, itemsize, &mut out);
    }
    out
}

/// Decode a run of elements
pub fn decode_all<T: Element>(bytes: &[u8], order: ByteOrder, itemsize: usize) -> Vec<T> {
    bytes
        .chunks_exact(itemsize)
        .map(|raw| T::decode(raw, order))
        .collect()
}
