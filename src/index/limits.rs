//! Representable-value arithmetic
//!
//! Range conditions arrive as comparison operators plus literals. Before
//! they reach the search engine they are turned into one closed interval
//! `[lo, hi]`: strict bounds move to the next representable value of the
//! element type, missing sides become the type's sentinel.
//!
//! Floats are stepped by decomposing into mantissa and exponent and adding
//! one unit in the last place to the mantissa. Byte strings are stepped as
//! big-endian counters that saturate at all-`0x00` / all-`0xFF`.

use crate::storage::error::{IndexError, IndexResult};
use crate::storage::types::{DataType, Element, Scalar};
use std::fmt;

// ==================== Floats ====================

/// One unit in the last place of an `f64` mantissa in `[0.5, 1)`: 2^-53
const F64_ULP: f64 = 1.0 / 9_007_199_254_740_992.0;
/// Smallest positive denormal: 2^-1074
const F64_TINY: f64 = 4.940_656_458_412_465_4e-324;

/// One unit in the last place of an `f32` mantissa in `[0.5, 1)`: 2^-24
const F32_ULP: f32 = 1.0 / 16_777_216.0;
/// Smallest positive denormal: 2^-149
const F32_TINY: f32 = 1.401_298_5e-45;

/// Below 2^-1021 every neighbor is one denormal step away
fn f64_denormal_limit() -> f64 {
    f64::from_bits(2u64 << 52)
}

fn f32_denormal_limit() -> f32 {
    f32::from_bits(2u32 << 23)
}

/// Split a normal `x` into `(m, e)` with `x = m * 2^e` and `|m|` in `[0.5, 1)`
fn frexp_f64(x: f64) -> (f64, i32) {
    let bits = x.to_bits();
    let exp_field = ((bits >> 52) & 0x7ff) as i32;
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exp_field - 1022)
}

/// `m * 2^e` for results in the normal range
fn ldexp_f64(m: f64, e: i32) -> f64 {
    let scale = f64::from_bits(((e - 1 + 1023) as u64) << 52);
    (m * 2.0) * scale
}

fn frexp_f32(x: f32) -> (f32, i32) {
    let bits = x.to_bits();
    let exp_field = ((bits >> 23) & 0xff) as i32;
    let mantissa = f32::from_bits((bits & !(0xffu32 << 23)) | (126u32 << 23));
    (mantissa, exp_field - 126)
}

fn ldexp_f32(m: f32, e: i32) -> f32 {
    let scale = f32::from_bits(((e - 1 + 127) as u32) << 23);
    (m * 2.0) * scale
}

/// Next representable `f64` after `x` in `direction`
///
/// NaN, infinities and values already at the type maximum in the requested
/// direction are returned unchanged.
pub fn next_after_f64(x: f64, direction: i32) -> f64 {
    if direction == 0 || x.is_nan() || x.is_infinite() {
        return x;
    }
    if (direction > 0 && x >= f64::MAX) || (direction < 0 && x <= -f64::MAX) {
        return x;
    }

    let step = if direction > 0 { 1.0 } else { -1.0 };
    if x.abs() < f64_denormal_limit() {
        return x + step * F64_TINY;
    }

    let (m, e) = frexp_f64(x);
    // Crossing a power of two toward zero halves the spacing
    let toward_zero = (x > 0.0) != (direction > 0);
    let ulp = if toward_zero && m.abs() == 0.5 {
        F64_ULP / 2.0
    } else {
        F64_ULP
    };
    ldexp_f64(m + step * ulp, e)
}

/// Next representable `f32` after `x` in `direction`
pub fn next_after_f32(x: f32, direction: i32) -> f32 {
    if direction == 0 || x.is_nan() || x.is_infinite() {
        return x;
    }
    if (direction > 0 && x >= f32::MAX) || (direction < 0 && x <= -f32::MAX) {
        return x;
    }

    let step = if direction > 0 { 1.0 } else { -1.0 };
    if x.abs() < f32_denormal_limit() {
        return x + step * F32_TINY;
    }

    let (m, e) = frexp_f32(x);
    let toward_zero = (x > 0.0) != (direction > 0);
    let ulp = if toward_zero && m.abs() == 0.5 {
        F32_ULP / 2.0
    } else {
        F32_ULP
    };
    ldexp_f32(m + step * ulp, e)
}

// ==================== Integers ====================

/// Integers that can be stepped by one, saturating at the type bounds
pub trait StepInt: Copy {
    fn step_up(self) -> Self;
    fn step_down(self) -> Self;
}

macro_rules! step_int_impl {
    ($($t:ty),*) => {
        $(
            impl StepInt for $t {
                fn step_up(self) -> Self {
                    self.saturating_add(1)
                }

                fn step_down(self) -> Self {
                    self.saturating_sub(1)
                }
            }
        )*
    };
}

step_int_impl!(i8, i16, i32, i64, u8, u16, u32, u64);

pub fn step_int<T: StepInt>(x: T, direction: i32) -> T {
    match direction.signum() {
        1 => x.step_up(),
        -1 => x.step_down(),
        _ => x,
    }
}

// ==================== Byte strings ====================

/// Step a fixed-width byte string as a big-endian counter, in place
pub fn step_bytes(buf: &mut [u8], direction: i32) {
    match direction.signum() {
        1 => {
            if let Some(pos) = buf.iter().rposition(|b| *b != 0xFF) {
                buf[pos] += 1;
                buf[pos + 1..].iter_mut().for_each(|b| *b = 0x00);
            }
        }
        -1 => {
            if let Some(pos) = buf.iter().rposition(|b| *b != 0x00) {
                buf[pos] -= 1;
                buf[pos + 1..].iter_mut().for_each(|b| *b = 0xFF);
            }
        }
        _ => {}
    }
}

pub fn bytes_sentinel(itemsize: usize, sign: i32) -> Vec<u8> {
    if sign < 0 {
        vec![0x00; itemsize]
    } else {
        vec![0xFF; itemsize]
    }
}

// ==================== Dynamic entry points ====================

fn int_bounds(dtype: DataType) -> Option<(i128, i128)> {
    let bounds = match dtype {
        DataType::Int8 => (i8::MIN as i128, i8::MAX as i128),
        DataType::Int16 => (i16::MIN as i128, i16::MAX as i128),
        DataType::Int32 => (i32::MIN as i128, i32::MAX as i128),
        DataType::Int64 => (i64::MIN as i128, i64::MAX as i128),
        DataType::UInt8 => (0, u8::MAX as i128),
        DataType::UInt16 => (0, u16::MAX as i128),
        DataType::UInt32 => (0, u32::MAX as i128),
        DataType::UInt64 => (0, u64::MAX as i128),
        _ => return None,
    };
    Some(bounds)
}

fn mismatch(value: &Scalar, dtype: DataType) -> IndexError {
    IndexError::UnsupportedType(format!("{:?} is not a {} value", value, dtype))
}

/// Next representable value of `value` interpreted as `dtype`
pub fn next_representable(value: &Scalar, direction: i32, dtype: DataType) -> IndexResult<Scalar> {
    match (value, dtype) {
        (Scalar::Int(x), dt) if dt.is_signed() => {
            let (min, max) = int_bounds(dt).ok_or_else(|| mismatch(value, dt))?;
            let stepped = (*x as i128 + direction.signum() as i128).clamp(min, max);
            Ok(Scalar::Int(stepped as i64))
        }
        (Scalar::UInt(x), dt) if dt.is_unsigned() => {
            let (min, max) = int_bounds(dt).ok_or_else(|| mismatch(value, dt))?;
            let stepped = (*x as i128 + direction.signum() as i128).clamp(min, max);
            Ok(Scalar::UInt(stepped as u64))
        }
        (Scalar::Float(x), DataType::Float64) => Ok(Scalar::Float(next_after_f64(*x, direction))),
        (Scalar::Float(x), DataType::Float32) => Ok(Scalar::Float(
            next_after_f32(*x as f32, direction) as f64,
        )),
        (Scalar::Bytes(raw), DataType::Bytes(width)) => {
            if raw.len() != width {
                return Err(IndexError::Precondition(format!(
                    "Byte string of {} bytes used with {}",
                    raw.len(),
                    dtype
                )));
            }
            let mut buf = raw.clone();
            step_bytes(&mut buf, direction);
            Ok(Scalar::Bytes(buf))
        }
        _ => Err(mismatch(value, dtype)),
    }
}

/// Minimum (`sign < 0`) or maximum (`sign > 0`) value of `dtype`
pub fn type_sentinel(dtype: DataType, sign: i32) -> IndexResult<Scalar> {
    let scalar = match dtype {
        DataType::Float32 | DataType::Float64 => Scalar::Float(if sign < 0 {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }),
        DataType::Bytes(width) => Scalar::Bytes(bytes_sentinel(width, sign)),
        dt => {
            let (min, max) = int_bounds(dt)
                .ok_or_else(|| IndexError::UnsupportedType(dt.to_string()))?;
            let bound = if sign < 0 { min } else { max };
            if dt.is_signed() {
                Scalar::Int(bound as i64)
            } else {
                Scalar::UInt(bound as u64)
            }
        }
    };
    Ok(scalar)
}

// ==================== Range conversion ====================

/// Comparison operator of a range condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl std::str::FromStr for CompareOp {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" | "<" => Ok(CompareOp::Lt),
            "le" | "<=" => Ok(CompareOp::Le),
            "eq" | "==" | "=" => Ok(CompareOp::Eq),
            "ge" | ">=" => Ok(CompareOp::Ge),
            "gt" | ">" => Ok(CompareOp::Gt),
            other => Err(IndexError::Precondition(format!(
                "Unknown comparison operator: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Eq => "eq",
            CompareOp::Ge => "ge",
            CompareOp::Gt => "gt",
        };
        write!(f, "{}", op)
    }
}

/// Closed interval `[lo, hi]` over the element ordering
#[derive(Debug, Clone, PartialEq)]
pub struct Interval<T> {
    pub lo: T,
    pub hi: T,
}

impl<T: Element> Interval<T> {
    pub fn new(lo: T, hi: T) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.lo <= *value && *value <= self.hi
    }
}

/// Step `limit` strictly in `direction`, or `None` when it cannot move
fn strict<T: Element>(limit: &T, direction: i32) -> Option<T> {
    let moved = limit.next_representable(direction);
    if moved.sort_cmp(limit).is_eq() {
        None
    } else {
        Some(moved)
    }
}

/// Turn one or two range conditions into a closed interval
///
/// Returns `Ok(None)` for conditions no value can satisfy, e.g.
/// `gt 10 and lt 5`.
pub fn closed_interval<T: Element>(
    ops: &[CompareOp],
    limits: &[T],
    itemsize: usize,
) -> IndexResult<Option<Interval<T>>> {
    if ops.is_empty() || ops.len() > 2 || ops.len() != limits.len() {
        return Err(IndexError::Precondition(format!(
            "A range needs one or two operators with one limit each (got {} operators, {} limits)",
            ops.len(),
            limits.len()
        )));
    }

    let interval = if ops.len() == 1 {
        let limit = &limits[0];
        let (lo, hi) = match ops[0] {
            CompareOp::Lt => match strict(limit, -1) {
                Some(hi) => (T::sentinel(-1, itemsize), hi),
                None => return Ok(None),
            },
            CompareOp::Le => (T::sentinel(-1, itemsize), limit.clone()),
            CompareOp::Gt => match strict(limit, 1) {
                Some(lo) => (lo, T::sentinel(1, itemsize)),
                None => return Ok(None),
            },
            CompareOp::Ge => (limit.clone(), T::sentinel(1, itemsize)),
            CompareOp::Eq => (limit.clone(), limit.clone()),
        };
        Interval::new(lo, hi)
    } else {
        let lower_ok = matches!(ops[0], CompareOp::Gt | CompareOp::Ge);
        let upper_ok = matches!(ops[1], CompareOp::Lt | CompareOp::Le);
        if !lower_ok || !upper_ok {
            return Err(IndexError::Precondition(format!(
                "Two-sided ranges must be (gt|ge, lt|le), got ({}, {})",
                ops[0], ops[1]
            )));
        }

        let (lower, upper) = (&limits[0], &limits[1]);
        if lower > upper {
            return Ok(None);
        }

        let lo = if ops[0] == CompareOp::Gt {
            match strict(lower, 1) {
                Some(lo) => lo,
                None => return Ok(None),
            }
        } else {
            lower.clone()
        };
        let hi = if ops[1] == CompareOp::Lt {
            match strict(upper, -1) {
                Some(hi) => hi,
                None => return Ok(None),
            }
        } else {
            upper.clone()
        };
        Interval::new(lo, hi)
    };

    if interval.lo.sort_cmp(&interval.hi).is_gt() {
        return Ok(None);
    }

    Ok(Some(interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::FixedBytes;

    fn bit_neighbor_f64(x: f64, direction: i32) -> f64 {
        let bits = x.to_bits() as i64;
        let up = (x >= 0.0) == (direction > 0);
        if x == 0.0 {
            return if direction > 0 { F64_TINY } else { -F64_TINY };
        }
        f64::from_bits(if up { bits + 1 } else { bits - 1 } as u64)
    }

    fn bit_neighbor_f32(x: f32, direction: i32) -> f32 {
        let bits = x.to_bits() as i32;
        let up = (x >= 0.0) == (direction > 0);
        if x == 0.0 {
            return if direction > 0 { F32_TINY } else { -F32_TINY };
        }
        f32::from_bits(if up { bits + 1 } else { bits - 1 } as u32)
    }

    #[test]
    fn test_next_after_f64_matches_bit_neighbors() {
        let samples = [
            1.0,
            -1.0,
            0.5,
            2.0,
            -2.0,
            3.141592653589793,
            1e-300,
            -1e300,
            123456.789,
            f64::MIN_POSITIVE,
            f64::MIN_POSITIVE * 4.0,
            F64_TINY * 3.0,
            0.0,
        ];
        for x in samples {
            for dir in [-1, 1] {
                assert_eq!(
                    next_after_f64(x, dir),
                    bit_neighbor_f64(x, dir),
                    "x={:e} dir={}",
                    x,
                    dir
                );
            }
        }
    }

    #[test]
    fn test_next_after_f32_matches_bit_neighbors() {
        let samples = [
            1.0f32,
            -1.0,
            0.5,
            4.0,
            -0.25,
            3.1415927,
            1e-30,
            -1e30,
            f32::MIN_POSITIVE,
            F32_TINY * 5.0,
            0.0,
        ];
        for x in samples {
            for dir in [-1, 1] {
                assert_eq!(
                    next_after_f32(x, dir),
                    bit_neighbor_f32(x, dir),
                    "x={:e} dir={}",
                    x,
                    dir
                );
            }
        }
    }

    #[test]
    fn test_next_after_monotonic_and_invertible() {
        for x in [1.5f64, -7.25, 1e10, -3e-200, 0.1] {
            let up = next_after_f64(x, 1);
            let down = next_after_f64(x, -1);
            assert!(down < x && x < up);
            assert_eq!(next_after_f64(up, -1), x);
            assert_eq!(next_after_f64(down, 1), x);
        }
        for x in [1.5f32, -7.25, 1e10, 0.1] {
            let up = next_after_f32(x, 1);
            let down = next_after_f32(x, -1);
            assert!(down < x && x < up);
            assert_eq!(next_after_f32(up, -1), x);
        }
    }

    #[test]
    fn test_next_after_extremes_unchanged() {
        assert_eq!(next_after_f64(f64::MAX, 1), f64::MAX);
        assert_eq!(next_after_f64(-f64::MAX, -1), -f64::MAX);
        assert!(next_after_f64(f64::MAX, -1) < f64::MAX);
        assert_eq!(next_after_f64(f64::INFINITY, -1), f64::INFINITY);
        assert!(next_after_f64(f64::NAN, 1).is_nan());
        assert_eq!(next_after_f64(2.5, 0), 2.5);
        assert_eq!(next_after_f32(f32::MAX, 1), f32::MAX);
        assert_eq!(next_after_f32(f32::NEG_INFINITY, 1), f32::NEG_INFINITY);
    }

    #[test]
    fn test_step_int_saturates() {
        assert_eq!(step_int(5i32, 1), 6);
        assert_eq!(step_int(5i32, -1), 4);
        assert_eq!(step_int(5i32, 0), 5);
        assert_eq!(step_int(i8::MAX, 1), i8::MAX);
        assert_eq!(step_int(0u16, -1), 0);
    }

    #[test]
    fn test_step_bytes_counter() {
        let mut buf = vec![0x61, 0xFF];
        step_bytes(&mut buf, 1);
        assert_eq!(buf, vec![0x62, 0x00]);

        let mut buf = vec![0x61, 0x00];
        step_bytes(&mut buf, -1);
        assert_eq!(buf, vec![0x60, 0xFF]);

        let mut buf = vec![0xFF, 0xFF];
        step_bytes(&mut buf, 1);
        assert_eq!(buf, vec![0xFF, 0xFF]);

        let mut buf = vec![0x00, 0x00];
        step_bytes(&mut buf, -1);
        assert_eq!(buf, vec![0x00, 0x00]);
    }

    #[test]
    fn test_dynamic_next_representable() {
        assert_eq!(
            next_representable(&Scalar::Int(127), 1, DataType::Int8).unwrap(),
            Scalar::Int(127)
        );
        assert_eq!(
            next_representable(&Scalar::UInt(3), -1, DataType::UInt32).unwrap(),
            Scalar::UInt(2)
        );
        assert_eq!(
            next_representable(&Scalar::Float(1.0), 1, DataType::Float64).unwrap(),
            Scalar::Float(1.0 + f64::EPSILON)
        );
        assert_eq!(
            next_representable(&Scalar::Bytes(vec![1, 0xFF]), 1, DataType::Bytes(2)).unwrap(),
            Scalar::Bytes(vec![2, 0])
        );

        let err = next_representable(&Scalar::Float(1.0), 1, DataType::Int32).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedType(_)));
        let err = next_representable(&Scalar::Bytes(vec![1]), 1, DataType::Bytes(2)).unwrap_err();
        assert!(matches!(err, IndexError::Precondition(_)));
    }

    #[test]
    fn test_type_sentinels() {
        assert_eq!(
            type_sentinel(DataType::Int16, -1).unwrap(),
            Scalar::Int(i16::MIN as i64)
        );
        assert_eq!(
            type_sentinel(DataType::UInt8, 1).unwrap(),
            Scalar::UInt(255)
        );
        assert_eq!(
            type_sentinel(DataType::Float32, 1).unwrap(),
            Scalar::Float(f64::INFINITY)
        );
        assert_eq!(
            type_sentinel(DataType::Bytes(2), -1).unwrap(),
            Scalar::Bytes(vec![0, 0])
        );
    }

    #[test]
    fn test_closed_interval_single_ops() {
        let lt = closed_interval(&[CompareOp::Lt], &[10i32], 4).unwrap().unwrap();
        assert_eq!(lt, Interval::new(i32::MIN, 9));

        let ge = closed_interval(&[CompareOp::Ge], &[10i32], 4).unwrap().unwrap();
        assert_eq!(ge, Interval::new(10, i32::MAX));

        let eq = closed_interval(&[CompareOp::Eq], &[2.5f64], 8).unwrap().unwrap();
        assert_eq!(eq, Interval::new(2.5, 2.5));

        let gt = closed_interval(&[CompareOp::Gt], &[1.0f64], 8).unwrap().unwrap();
        assert_eq!(gt.lo, 1.0 + f64::EPSILON);
        assert_eq!(gt.hi, f64::INFINITY);

        // Nothing is below the type minimum
        assert!(closed_interval(&[CompareOp::Lt], &[i32::MIN], 4)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_closed_interval_two_sided() {
        let range = closed_interval(&[CompareOp::Gt, CompareOp::Le], &[2i64, 7], 8)
            .unwrap()
            .unwrap();
        assert_eq!(range, Interval::new(3, 7));

        // lower > upper is always false, not an error
        let empty = closed_interval(&[CompareOp::Gt, CompareOp::Lt], &[10i32, 5], 4).unwrap();
        assert!(empty.is_none());

        // Strict conversion can also empty the range
        let empty = closed_interval(&[CompareOp::Gt, CompareOp::Lt], &[5i32, 6], 4).unwrap();
        assert!(empty.is_none());

        let bytes = closed_interval(
            &[CompareOp::Ge, CompareOp::Lt],
            &[FixedBytes::new(b"a", 2), FixedBytes::new(b"b", 2)],
            2,
        )
        .unwrap()
        .unwrap();
        assert_eq!(bytes.hi.as_bytes(), &[b'a', 0xFF]);
    }

    #[test]
    fn test_closed_interval_rejects_bad_shapes() {
        assert!(closed_interval::<i32>(&[], &[], 4).is_err());
        assert!(closed_interval(&[CompareOp::Lt, CompareOp::Gt], &[1i32, 2], 4).is_err());
        assert!(closed_interval(&[CompareOp::Ge], &[1i32, 2], 4).is_err());
        assert!("ne".parse::<CompareOp>().is_err());
        assert_eq!(">=".parse::<CompareOp>().unwrap(), CompareOp::Ge);
    }
}
