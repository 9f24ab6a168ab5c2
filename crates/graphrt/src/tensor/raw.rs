//! Owned native tensor storage exchanged with execution backends.

use thiserror::Error;

use super::dtype::DType;
use super::element::{Element, TensorValue};
use super::shape::checked_element_count;

/// A payload that cannot back a tensor of the given dtype and dims.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{dtype} tensor with dims {dims:?} needs {expected} bytes, got {actual}")]
    Size {
        dtype: DType,
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("{dtype} tensor with dims {dims:?} exceeds the address space")]
    Overflow { dtype: DType, dims: Vec<usize> },
}

/// Byte length of a dense `dtype` tensor with `dims`, or `None` on overflow.
pub fn checked_byte_len(dtype: DType, dims: &[usize]) -> Option<usize> {
    checked_element_count(dims)?.checked_mul(dtype.size_in_bytes())
}

/// Dense, row-major tensor with exclusively owned little-endian storage.
///
/// The storage lives exactly as long as the value: it is released on drop or when the owner
/// replaces it, and it is never shared between two owners.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    dtype: DType,
    dims: Vec<usize>,
    bytes: Vec<u8>,
}

impl RawTensor {
    pub fn new(dtype: DType, dims: Vec<usize>, bytes: Vec<u8>) -> Result<Self, LayoutError> {
        let Some(expected) = checked_byte_len(dtype, &dims) else {
            return Err(LayoutError::Overflow { dtype, dims });
        };
        if bytes.len() != expected {
            return Err(LayoutError::Size {
                dtype,
                dims,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(RawTensor { dtype, dims, bytes })
    }

    /// Allocates zero-filled storage for `dims`.
    pub fn zeroed(dtype: DType, dims: Vec<usize>) -> Result<Self, LayoutError> {
        let Some(len) = checked_byte_len(dtype, &dims) else {
            return Err(LayoutError::Overflow { dtype, dims });
        };
        Ok(RawTensor {
            dtype,
            dims,
            bytes: vec![0u8; len],
        })
    }

    pub fn from_slice<T: Element>(dims: Vec<usize>, values: &[T]) -> Result<Self, LayoutError> {
        RawTensor::new(T::DTYPE, dims, T::encode(values))
    }

    /// Rank-0 tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        RawTensor {
            dtype: T::DTYPE,
            dims: Vec::new(),
            bytes: T::encode(&[value]),
        }
    }

    pub fn from_value(dims: Vec<usize>, value: &TensorValue) -> Result<Self, LayoutError> {
        RawTensor::new(value.dtype(), dims, value.to_bytes())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Address of the storage, stable for as long as the allocation is kept.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// Decodes the payload as `T`; `None` when the dtype differs.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        (self.dtype == T::DTYPE).then(|| T::decode(&self.bytes))
    }

    pub fn to_value(&self) -> TensorValue {
        TensorValue::from_bytes(self.dtype, &self.bytes)
    }

    /// Overwrites the payload in place. The caller guarantees matching dtype and element count.
    pub(crate) fn write_slice<T: Element>(&mut self, values: &[T]) {
        debug_assert_eq!(self.dtype, T::DTYPE);
        debug_assert_eq!(self.element_count(), values.len());
        T::encode_into(values, &mut self.bytes);
    }

    pub fn into_parts(self) -> (DType, Vec<usize>, Vec<u8>) {
        (self.dtype, self.dims, self.bytes)
    }
}
