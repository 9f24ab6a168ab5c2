//! Host kernels over dense row-major tensors.

use graphrt::backend::{BackendError, BackendResult};
use graphrt::tensor::{DType, Element, RawTensor, TensorValue};
use half::{bf16, f16};

/// Interpreter value: resolved dims plus a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub dims: Vec<usize>,
    pub data: TensorValue,
}

impl HostTensor {
    pub fn new(dims: Vec<usize>, data: TensorValue) -> Self {
        Self { dims, data }
    }

    pub fn from_raw(raw: &RawTensor) -> Self {
        Self {
            dims: raw.dims().to_vec(),
            data: raw.to_value(),
        }
    }

    pub fn to_raw(&self) -> BackendResult<RawTensor> {
        RawTensor::from_value(self.dims.clone(), &self.data)
            .map_err(|err| BackendError::internal(err.to_string()))
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
}

/// Arithmetic used by the kernels. Integer arithmetic wraps; integer division is checked.
pub trait Numeric: Element {
    fn zero() -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn checked_div(self, rhs: Self) -> Option<Self>;
    /// `None` for unsigned types.
    fn neg(self) -> Option<Self>;
    fn from_count(count: usize) -> Self;
}

macro_rules! impl_float {
    ($($ty:ty => $zero:expr, $count:expr);* $(;)?) => {
        $(
            impl Numeric for $ty {
                fn zero() -> Self {
                    $zero
                }

                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }

                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }

                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }

                fn checked_div(self, rhs: Self) -> Option<Self> {
                    Some(self / rhs)
                }

                fn neg(self) -> Option<Self> {
                    Some(-self)
                }

                fn from_count(count: usize) -> Self {
                    $count(count)
                }
            }
        )*
    };
}

impl_float!(
    f32 => 0.0, |count: usize| count as f32;
    f64 => 0.0, |count: usize| count as f64;
    f16 => f16::ZERO, |count: usize| f16::from_f64(count as f64);
    bf16 => bf16::ZERO, |count: usize| bf16::from_f64(count as f64);
);

macro_rules! impl_int {
    ($($ty:ty => $neg:expr),* $(,)?) => {
        $(
            impl Numeric for $ty {
                fn zero() -> Self {
                    0
                }

                fn add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                fn sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }

                fn mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                fn checked_div(self, rhs: Self) -> Option<Self> {
                    <$ty>::checked_div(self, rhs)
                }

                fn neg(self) -> Option<Self> {
                    $neg(self)
                }

                fn from_count(count: usize) -> Self {
                    count as $ty
                }
            }
        )*
    };
}

impl_int!(
    i8 => |value: i8| Some(value.wrapping_neg()),
    i16 => |value: i16| Some(value.wrapping_neg()),
    i32 => |value: i32| Some(value.wrapping_neg()),
    i64 => |value: i64| Some(value.wrapping_neg()),
    u8 => |_: u8| None,
    u16 => |_: u16| None,
    u32 => |_: u32| None,
    u64 => |_: u64| None,
);

/// Conversion through `f64` used by `cast`.
pub trait CastElement: Element {
    fn to_wide(self) -> f64;
    fn from_wide(value: f64) -> Self;
}

macro_rules! impl_cast_primitive {
    ($($ty:ty),*) => {
        $(
            impl CastElement for $ty {
                fn to_wide(self) -> f64 {
                    self as f64
                }

                fn from_wide(value: f64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_cast_primitive!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64);

impl CastElement for f16 {
    fn to_wide(self) -> f64 {
        self.to_f64()
    }

    fn from_wide(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl CastElement for bf16 {
    fn to_wide(self) -> f64 {
        self.to_f64()
    }

    fn from_wide(value: f64) -> Self {
        bf16::from_f64(value)
    }
}

impl CastElement for bool {
    fn to_wide(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_wide(value: f64) -> Self {
        value != 0.0
    }
}

macro_rules! numeric_unary {
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
            TensorValue::Bool(_) => Err(BackendError::invalid_argument(
                "operation does not support bool operands",
            )),
        }
    };
}

macro_rules! numeric_binary {
    ($lhs:expr, $rhs:expr, $a:ident, $b:ident => $body:expr) => {
        match ($lhs, $rhs) {
            (TensorValue::F32($a), TensorValue::F32($b)) => $body,
            (TensorValue::F64($a), TensorValue::F64($b)) => $body,
            (TensorValue::F16($a), TensorValue::F16($b)) => $body,
            (TensorValue::BF16($a), TensorValue::BF16($b)) => $body,
            (TensorValue::I8($a), TensorValue::I8($b)) => $body,
            (TensorValue::I16($a), TensorValue::I16($b)) => $body,
            (TensorValue::I32($a), TensorValue::I32($b)) => $body,
            (TensorValue::I64($a), TensorValue::I64($b)) => $body,
            (TensorValue::U8($a), TensorValue::U8($b)) => $body,
            (TensorValue::U16($a), TensorValue::U16($b)) => $body,
            (TensorValue::U32($a), TensorValue::U32($b)) => $body,
            (TensorValue::U64($a), TensorValue::U64($b)) => $body,
            (lhs, rhs) => Err(BackendError::invalid_argument(format!(
                "unsupported operand dtypes {} and {}",
                lhs.dtype(),
                rhs.dtype()
            ))),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Neg,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Mean,
}

pub fn binary(kind: BinaryKind, lhs: &HostTensor, rhs: &HostTensor) -> BackendResult<HostTensor> {
    numeric_binary!(&lhs.data, &rhs.data, a, b => {
        binary_typed(kind, a, &lhs.dims, b, &rhs.dims)
    })
}

pub fn unary(kind: UnaryKind, input: &HostTensor) -> BackendResult<HostTensor> {
    numeric_unary!(&input.data, values => unary_typed(kind, values, &input.dims))
}

pub fn matmul(
    lhs: &HostTensor,
    rhs: &HostTensor,
    transpose_a: bool,
    transpose_b: bool,
) -> BackendResult<HostTensor> {
    numeric_binary!(&lhs.data, &rhs.data, a, b => {
        matmul_typed(a, &lhs.dims, transpose_a, b, &rhs.dims, transpose_b)
    })
}

pub fn reduce(
    kind: ReduceKind,
    input: &HostTensor,
    axes: Option<&[usize]>,
) -> BackendResult<HostTensor> {
    numeric_unary!(&input.data, values => reduce_typed(kind, values, &input.dims, axes))
}

pub fn cast(input: &HostTensor, dtype: DType) -> HostTensor {
    let wide: Vec<f64> = match &input.data {
        TensorValue::F32(values) => widen(values),
        TensorValue::F64(values) => widen(values),
        TensorValue::F16(values) => widen(values),
        TensorValue::BF16(values) => widen(values),
        TensorValue::I8(values) => widen(values),
        TensorValue::I16(values) => widen(values),
        TensorValue::I32(values) => widen(values),
        TensorValue::I64(values) => widen(values),
        TensorValue::U8(values) => widen(values),
        TensorValue::U16(values) => widen(values),
        TensorValue::U32(values) => widen(values),
        TensorValue::U64(values) => widen(values),
        TensorValue::Bool(values) => widen(values),
    };
    let data = match dtype {
        DType::F32 => narrow::<f32>(&wide),
        DType::F64 => narrow::<f64>(&wide),
        DType::F16 => narrow::<f16>(&wide),
        DType::BF16 => narrow::<bf16>(&wide),
        DType::I8 => narrow::<i8>(&wide),
        DType::I16 => narrow::<i16>(&wide),
        DType::I32 => narrow::<i32>(&wide),
        DType::I64 => narrow::<i64>(&wide),
        DType::U8 => narrow::<u8>(&wide),
        DType::U16 => narrow::<u16>(&wide),
        DType::U32 => narrow::<u32>(&wide),
        DType::U64 => narrow::<u64>(&wide),
        DType::Bool => narrow::<bool>(&wide),
    };
    HostTensor::new(input.dims.clone(), data)
}

fn widen<T: CastElement>(values: &[T]) -> Vec<f64> {
    values.iter().map(|value| value.to_wide()).collect()
}

fn narrow<T: CastElement>(values: &[f64]) -> TensorValue {
    T::into_value(values.iter().map(|&value| T::from_wide(value)).collect())
}

fn binary_typed<T: Numeric>(
    kind: BinaryKind,
    lhs: &[T],
    lhs_dims: &[usize],
    rhs: &[T],
    rhs_dims: &[usize],
) -> BackendResult<HostTensor> {
    let apply = |a: T, b: T| -> BackendResult<T> {
        match kind {
            BinaryKind::Add => Ok(a.add(b)),
            BinaryKind::Sub => Ok(a.sub(b)),
            BinaryKind::Mul => Ok(a.mul(b)),
            BinaryKind::Div => a.checked_div(b).ok_or_else(|| {
                BackendError::invalid_argument("integer division by zero or overflow")
            }),
        }
    };

    let (dims, values) = if lhs_dims == rhs_dims {
        let values = lhs
            .iter()
            .zip(rhs)
            .map(|(&a, &b)| apply(a, b))
            .collect::<BackendResult<Vec<T>>>()?;
        (lhs_dims.to_vec(), values)
    } else if rhs_dims.is_empty() {
        let b = rhs[0];
        let values = lhs
            .iter()
            .map(|&a| apply(a, b))
            .collect::<BackendResult<Vec<T>>>()?;
        (lhs_dims.to_vec(), values)
    } else if lhs_dims.is_empty() {
        let a = lhs[0];
        let values = rhs
            .iter()
            .map(|&b| apply(a, b))
            .collect::<BackendResult<Vec<T>>>()?;
        (rhs_dims.to_vec(), values)
    } else {
        return Err(BackendError::invalid_argument(format!(
            "incompatible operand shapes {:?} and {:?}",
            lhs_dims, rhs_dims
        )));
    };
    Ok(HostTensor::new(dims, T::into_value(values)))
}

fn unary_typed<T: Numeric>(
    kind: UnaryKind,
    values: &[T],
    dims: &[usize],
) -> BackendResult<HostTensor> {
    let out = match kind {
        UnaryKind::Neg => values
            .iter()
            .map(|&value| value.neg())
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| {
                BackendError::unimplemented(format!("neg is not defined for {}", T::DTYPE))
            })?,
        UnaryKind::Square => values.iter().map(|&value| value.mul(value)).collect(),
    };
    Ok(HostTensor::new(dims.to_vec(), T::into_value(out)))
}

fn matmul_typed<T: Numeric>(
    lhs: &[T],
    lhs_dims: &[usize],
    transpose_a: bool,
    rhs: &[T],
    rhs_dims: &[usize],
    transpose_b: bool,
) -> BackendResult<HostTensor> {
    if lhs_dims.len() != 2 || rhs_dims.len() != 2 {
        return Err(BackendError::invalid_argument(format!(
            "mat_mul needs rank-2 operands, got {:?} and {:?}",
            lhs_dims, rhs_dims
        )));
    }
    let (m, k) = if transpose_a {
        (lhs_dims[1], lhs_dims[0])
    } else {
        (lhs_dims[0], lhs_dims[1])
    };
    let (k_rhs, n) = if transpose_b {
        (rhs_dims[1], rhs_dims[0])
    } else {
        (rhs_dims[0], rhs_dims[1])
    };
    if k != k_rhs {
        return Err(BackendError::invalid_argument(format!(
            "mat_mul inner dimensions disagree: {k} vs {k_rhs}"
        )));
    }

    let lhs_at = |i: usize, p: usize| {
        if transpose_a {
            lhs[p * lhs_dims[1] + i]
        } else {
            lhs[i * lhs_dims[1] + p]
        }
    };
    let rhs_at = |p: usize, j: usize| {
        if transpose_b {
            rhs[j * rhs_dims[1] + p]
        } else {
            rhs[p * rhs_dims[1] + j]
        }
    };

    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::zero();
            for p in 0..k {
                acc = acc.add(lhs_at(i, p).mul(rhs_at(p, j)));
            }
            out.push(acc);
        }
    }
    Ok(HostTensor::new(vec![m, n], T::into_value(out)))
}

fn reduce_typed<T: Numeric>(
    kind: ReduceKind,
    values: &[T],
    dims: &[usize],
    axes: Option<&[usize]>,
) -> BackendResult<HostTensor> {
    let mut reduced = vec![axes.is_none(); dims.len()];
    for &axis in axes.unwrap_or(&[]) {
        let flag = reduced.get_mut(axis).ok_or_else(|| {
            BackendError::invalid_argument(format!(
                "reduction axis {axis} out of range for rank {}",
                dims.len()
            ))
        })?;
        *flag = true;
    }

    let mut out_strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        if !reduced[axis] {
            out_strides[axis] = stride;
            stride *= dims[axis];
        }
    }
    let out_dims: Vec<usize> = dims
        .iter()
        .zip(&reduced)
        .filter(|(_, reduced)| !**reduced)
        .map(|(dim, _)| *dim)
        .collect();
    let out_len = out_dims.iter().product::<usize>();
    let count = dims
        .iter()
        .zip(&reduced)
        .filter(|(_, reduced)| **reduced)
        .map(|(dim, _)| *dim)
        .product::<usize>();

    let mut out = vec![T::zero(); out_len];
    for (linear, &value) in values.iter().enumerate() {
        let mut rem = linear;
        let mut target = 0usize;
        for axis in (0..dims.len()).rev() {
            let coord = rem % dims[axis];
            rem /= dims[axis];
            target += coord * out_strides[axis];
        }
        out[target] = out[target].add(value);
    }

    if kind == ReduceKind::Mean {
        let divisor = T::from_count(count);
        for slot in out.iter_mut() {
            *slot = slot.checked_div(divisor).ok_or_else(|| {
                BackendError::invalid_argument("mean over an empty reduction")
            })?;
        }
    }
    Ok(HostTensor::new(out_dims, T::into_value(out)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(dims: &[usize], values: impl Into<TensorValue>) -> HostTensor {
        HostTensor::new(dims.to_vec(), values.into())
    }

    #[test]
    fn scalar_operands_broadcast() {
        let x = tensor(&[3], vec![1.0f32, 2.0, 3.0]);
        let two = tensor(&[], vec![2.0f32]);
        let out = binary(BinaryKind::Mul, &x, &two).unwrap();
        assert_eq!(out, tensor(&[3], vec![2.0f32, 4.0, 6.0]));
        let out = binary(BinaryKind::Sub, &two, &x).unwrap();
        assert_eq!(out, tensor(&[3], vec![1.0f32, 0.0, -1.0]));
    }

    #[test]
    fn integer_ops_wrap_and_check_division() {
        let a = tensor(&[2], vec![i8::MAX, 4]);
        let b = tensor(&[2], vec![1i8, 0]);
        let sum = binary(BinaryKind::Add, &a, &b).unwrap();
        assert_eq!(sum.data, TensorValue::from(vec![i8::MIN, 4]));
        let err = binary(BinaryKind::Div, &a, &b).unwrap_err();
        assert_eq!(err.code, graphrt::Code::InvalidArgument);
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let a = tensor(&[2], vec![1.0f32, 2.0]);
        let b = tensor(&[3], vec![1.0f32, 2.0, 3.0]);
        assert!(binary(BinaryKind::Add, &a, &b).is_err());
        let c = tensor(&[2], vec![1.0f64, 2.0]);
        assert!(binary(BinaryKind::Add, &a, &c).is_err());
    }

    #[test]
    fn neg_of_unsigned_is_unimplemented() {
        let err = unary(UnaryKind::Neg, &tensor(&[1], vec![3u32])).unwrap_err();
        assert_eq!(err.code, graphrt::Code::Unimplemented);
        let out = unary(UnaryKind::Square, &tensor(&[2], vec![-3i64, 4])).unwrap();
        assert_eq!(out.data, TensorValue::from(vec![9i64, 16]));
    }

    #[test]
    fn matmul_with_transpose() {
        let a = tensor(&[2, 3], vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = tensor(&[2, 1], vec![1.0f64, 1.0]);
        let out = matmul(&a, &b, true, false).unwrap();
        assert_eq!(out, tensor(&[3, 1], vec![5.0f64, 7.0, 9.0]));
        assert!(matmul(&a, &b, false, false).is_err());
    }

    #[test]
    fn reductions_over_axes() {
        let x = tensor(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]);
        let rows = reduce(ReduceKind::Sum, &x, Some(&[1])).unwrap();
        assert_eq!(rows, tensor(&[2], vec![6i32, 15]));
        let cols = reduce(ReduceKind::Mean, &x, Some(&[0])).unwrap();
        assert_eq!(cols, tensor(&[3], vec![2i32, 3, 4]));
        let flat = tensor(&[4], vec![1.0f32, 2.0, 3.0, 4.0]);
        let all = reduce(ReduceKind::Mean, &flat, None).unwrap();
        assert_eq!(all, tensor(&[], vec![2.5f32]));
    }

    #[test]
    fn cast_goes_through_f64() {
        let x = tensor(&[3], vec![1.7f32, -2.0, 0.0]);
        assert_eq!(cast(&x, DType::I32).data, TensorValue::from(vec![1i32, -2, 0]));
        assert_eq!(
            cast(&x, DType::Bool).data,
            TensorValue::from(vec![true, true, false])
        );
        assert_eq!(cast(&x, DType::U8).data, TensorValue::from(vec![1u8, 0, 0]));
    }
}
