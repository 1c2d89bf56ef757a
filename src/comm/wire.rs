//! Fixed little-endian wire records and the scalar set the collectives accept.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use std::fmt::Debug;

/// Reduction operator for value-level collectives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

/// Scalars that can travel through `allreduce`/`exscan`.
///
/// Integer sums wrap; callers that need exact wide sums use `i128`.
pub trait CommScalar: Pod + PartialOrd + Debug + Send + Sync + 'static {
    const ZERO: Self;
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

macro_rules! int_scalar {
    ($($t:ty),*) => {
        $(
            impl CommScalar for $t {
                const ZERO: Self = 0;
                #[inline]
                fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                    match op {
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                        ReduceOp::Sum => a.wrapping_add(b),
                    }
                }
            }
        )*
    };
}

int_scalar!(i8, i32, i64, i128, u64);

impl CommScalar for f64 {
    const ZERO: Self = 0.0;
    #[inline]
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
        match op {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// Length prefix for variable-size payloads.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLen(u64);

assert_eq_size!(WireLen, u64);

impl WireLen {
    pub fn new(n: usize) -> Self {
        Self((n as u64).to_le())
    }
    pub fn get(self) -> usize {
        u64::from_le(self.0) as usize
    }
}

/// One rank's contribution to a communicator split.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SplitRecord {
    color_le: i32,
    key_le: i32,
}

assert_eq_size!(SplitRecord, u64);

impl SplitRecord {
    pub fn new(color: i32, key: i32) -> Self {
        Self {
            color_le: color.to_le(),
            key_le: key.to_le(),
        }
    }
    pub fn color(&self) -> i32 {
        i32::from_le(self.color_le)
    }
    pub fn key(&self) -> i32 {
        i32::from_le(self.key_le)
    }
}

pub fn encode<T: Pod>(v: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

pub fn encode_one<T: Pod>(v: &T) -> Vec<u8> {
    bytemuck::bytes_of(v).to_vec()
}

/// Decode a byte buffer into owned, properly aligned values.
///
/// Panics when the byte count is not a multiple of `size_of::<T>()`; on the
/// receive path that is a broken exchange, not a recoverable input.
pub fn decode<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let width = std::mem::size_of::<T>();
    if width == 0 {
        return Vec::new();
    }
    assert!(
        bytes.len() % width == 0,
        "wire: {} bytes is not a whole number of {}-byte records",
        bytes.len(),
        width
    );
    let mut out = vec![T::zeroed(); bytes.len() / width];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    out
}

pub fn decode_one<T: Pod>(bytes: &[u8]) -> T {
    assert_eq!(
        bytes.len(),
        std::mem::size_of::<T>(),
        "wire: unexpected record size"
    );
    bytemuck::pod_read_unaligned(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_ops() {
        assert_eq!(i32::combine(ReduceOp::Min, 3, -2), -2);
        assert_eq!(i8::combine(ReduceOp::Max, 0, 1), 1);
        assert_eq!(f64::combine(ReduceOp::Sum, 0.5, 0.25), 0.75);
        assert_eq!(i128::combine(ReduceOp::Sum, i128::MAX, 0), i128::MAX);
    }

    #[test]
    fn decode_realigns() {
        let src = [1.5f64, -2.0];
        let mut bytes = vec![0u8];
        bytes.extend(encode(&src));
        let back: Vec<f64> = decode(&bytes[1..]);
        assert_eq!(back, src);
    }

    #[test]
    fn split_record_fields() {
        let r = SplitRecord::new(-1, 7);
        let back: SplitRecord = decode_one(&encode_one(&r));
        assert_eq!((back.color(), back.key()), (-1, 7));
    }
}
