//! Host element types and the closed value enum used for dictionary-style feeds.

use std::fmt;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use super::dtype::DType;

/// Scalar type that can be stored in a tensor buffer.
///
/// Each implementation is tied to exactly one [`DType`], so a typed read or write is validated by
/// comparing tags instead of inspecting type names at runtime.
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// Dtype tag of this element type.
    const DTYPE: DType;

    /// Encodes `values` into `out`, which must be exactly `values.len() * size` bytes long.
    fn encode_into(values: &[Self], out: &mut [u8]);

    /// Decodes a byte slice whose length is a multiple of the element size.
    fn decode(bytes: &[u8]) -> Vec<Self>;

    /// Wraps an owned vector in the matching [`TensorValue`] variant.
    fn into_value(values: Vec<Self>) -> TensorValue;

    /// Borrows the payload of `value` when it holds this element type.
    fn slice_of(value: &TensorValue) -> Option<&[Self]>;

    /// Encodes a slice into a freshly allocated byte vector.
    fn encode(values: &[Self]) -> Vec<u8> {
        let mut out = vec![0u8; std::mem::size_of_val(values)];
        Self::encode_into(values, &mut out);
        out
    }
}

macro_rules! impl_pod_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$variant;

                fn encode_into(values: &[Self], out: &mut [u8]) {
                    out.copy_from_slice(bytemuck::cast_slice(values));
                }

                fn decode(bytes: &[u8]) -> Vec<Self> {
                    bytemuck::pod_collect_to_vec(bytes)
                }

                fn into_value(values: Vec<Self>) -> TensorValue {
                    TensorValue::$variant(values)
                }

                fn slice_of(value: &TensorValue) -> Option<&[Self]> {
                    match value {
                        TensorValue::$variant(values) => Some(values),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_pod_element!(
    f32 => F32,
    f64 => F64,
    f16 => F16,
    bf16 => BF16,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn encode_into(values: &[Self], out: &mut [u8]) {
        for (byte, value) in out.iter_mut().zip(values) {
            *byte = u8::from(*value);
        }
    }

    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|&byte| byte != 0).collect()
    }

    fn into_value(values: Vec<Self>) -> TensorValue {
        TensorValue::Bool(values)
    }

    fn slice_of(value: &TensorValue) -> Option<&[Self]> {
        match value {
            TensorValue::Bool(values) => Some(values),
            _ => None,
        }
    }
}

/// Owned, typed payload for every supported element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorValue {
    F32(Vec<f32>),
    F64(Vec<f64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    Bool(Vec<bool>),
}

/// Expands `$body` once per variant with `$values` bound to the inner vector.
macro_rules! with_values {
    ($value:expr, $values:ident => $body:expr) => {
        match $value {
            TensorValue::F32($values) => $body,
            TensorValue::F64($values) => $body,
            TensorValue::F16($values) => $body,
            TensorValue::BF16($values) => $body,
            TensorValue::I8($values) => $body,
            TensorValue::I16($values) => $body,
            TensorValue::I32($values) => $body,
            TensorValue::I64($values) => $body,
            TensorValue::U8($values) => $body,
            TensorValue::U16($values) => $body,
            TensorValue::U32($values) => $body,
            TensorValue::U64($values) => $body,
            TensorValue::Bool($values) => $body,
        }
    };
}

pub(crate) use with_values;

impl TensorValue {
    pub fn dtype(&self) -> DType {
        match self {
            TensorValue::F32(_) => DType::F32,
            TensorValue::F64(_) => DType::F64,
            TensorValue::F16(_) => DType::F16,
            TensorValue::BF16(_) => DType::BF16,
            TensorValue::I8(_) => DType::I8,
            TensorValue::I16(_) => DType::I16,
            TensorValue::I32(_) => DType::I32,
            TensorValue::I64(_) => DType::I64,
            TensorValue::U8(_) => DType::U8,
            TensorValue::U16(_) => DType::U16,
            TensorValue::U32(_) => DType::U32,
            TensorValue::U64(_) => DType::U64,
            TensorValue::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the payload as `T`, returning `None` on dtype mismatch.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice_of(self)
    }

    /// Encodes the payload into raw element bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        with_values!(self, values => Element::encode(values.as_slice()))
    }

    /// Decodes raw element bytes of `dtype` into a typed payload.
    pub fn from_bytes(dtype: DType, bytes: &[u8]) -> TensorValue {
        match dtype {
            DType::F32 => f32::into_value(f32::decode(bytes)),
            DType::F64 => f64::into_value(f64::decode(bytes)),
            DType::F16 => f16::into_value(f16::decode(bytes)),
            DType::BF16 => bf16::into_value(bf16::decode(bytes)),
            DType::I8 => i8::into_value(i8::decode(bytes)),
            DType::I16 => i16::into_value(i16::decode(bytes)),
            DType::I32 => i32::into_value(i32::decode(bytes)),
            DType::I64 => i64::into_value(i64::decode(bytes)),
            DType::U8 => u8::into_value(u8::decode(bytes)),
            DType::U16 => u16::into_value(u16::decode(bytes)),
            DType::U32 => u32::into_value(u32::decode(bytes)),
            DType::U64 => u64::into_value(u64::decode(bytes)),
            DType::Bool => bool::into_value(bool::decode(bytes)),
        }
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for TensorValue {
                fn from(values: Vec<$ty>) -> Self {
                    <$ty as Element>::into_value(values)
                }
            }
        )*
    };
}

impl_from_vec!(f32, f64, f16, bf16, i8, i16, i32, i64, u8, u16, u32, u64, bool);
