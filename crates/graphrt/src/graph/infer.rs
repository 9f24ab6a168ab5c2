//! Load-time dtype and shape inference for graph nodes.

use crate::tensor::{checked_element_count, DType, DeclaredShape, Dim};

use super::def::OpDef;
use super::{EndpointSpec, OutputSignature};

/// Operand seen by inference: the producing op and its output signature.
pub(crate) struct Operand<'a> {
    pub name: &'a str,
    pub op: &'a OpDef,
    pub output: &'a OutputSignature,
}

impl<'a> Operand<'a> {
    fn data(&self) -> Result<&'a EndpointSpec, String> {
        match self.output {
            OutputSignature::Data(spec) => Ok(spec),
            OutputSignature::Control => Err(format!(
                "input '{}' is a control-only operation and produces no data",
                self.name
            )),
        }
    }
}

pub(crate) fn infer_output(op: &OpDef, inputs: &[Operand<'_>]) -> Result<OutputSignature, String> {
    if inputs.len() != op.arity() {
        return Err(format!(
            "{} expects {} data input(s), got {}",
            op.kind(),
            op.arity(),
            inputs.len()
        ));
    }

    let spec = match op {
        OpDef::Placeholder { dtype, shape } | OpDef::Variable { dtype, shape } => EndpointSpec {
            dtype: *dtype,
            shape: shape.clone(),
        },
        OpDef::Const { literal } => {
            let expected = checked_element_count(&literal.shape).ok_or_else(|| {
                format!("constant shape {:?} overflows the element count", literal.shape)
            })?;
            if literal.value.len() != expected {
                return Err(format!(
                    "constant of shape {:?} needs {} values, got {}",
                    literal.shape,
                    expected,
                    literal.value.len()
                ));
            }
            EndpointSpec {
                dtype: literal.value.dtype(),
                shape: DeclaredShape::from_resolved(&literal.shape),
            }
        }
        OpDef::NoOp => return Ok(OutputSignature::Control),
        OpDef::Identity => inputs[0].data()?.clone(),
        OpDef::Add | OpDef::Sub | OpDef::Mul | OpDef::Div => {
            let lhs = inputs[0].data()?;
            let rhs = inputs[1].data()?;
            let dtype = same_numeric_dtype(op, lhs.dtype, rhs.dtype)?;
            EndpointSpec {
                dtype,
                shape: broadcast_scalar(op, &lhs.shape, &rhs.shape)?,
            }
        }
        OpDef::Neg => {
            let input = inputs[0].data()?;
            if !(input.dtype.is_float() || input.dtype.is_signed_integer()) {
                return Err(format!("neg does not support {}", input.dtype));
            }
            input.clone()
        }
        OpDef::Square => {
            let input = inputs[0].data()?;
            require_numeric(op, input.dtype)?;
            input.clone()
        }
        OpDef::MatMul {
            transpose_a,
            transpose_b,
        } => {
            let lhs = inputs[0].data()?;
            let rhs = inputs[1].data()?;
            let dtype = same_numeric_dtype(op, lhs.dtype, rhs.dtype)?;
            if lhs.shape.rank() != 2 || rhs.shape.rank() != 2 {
                return Err(format!(
                    "mat_mul needs rank-2 operands, got {} and {}",
                    lhs.shape, rhs.shape
                ));
            }
            let (m, k_lhs) = matrix_dims(&lhs.shape, *transpose_a);
            let (k_rhs, n) = matrix_dims(&rhs.shape, *transpose_b);
            if !k_lhs.is_compatible_with(k_rhs) {
                return Err(format!(
                    "mat_mul inner dimensions disagree: {} vs {}",
                    lhs.shape, rhs.shape
                ));
            }
            EndpointSpec {
                dtype,
                shape: DeclaredShape::new(vec![m, n]),
            }
        }
        OpDef::ReduceSum { axes } | OpDef::ReduceMean { axes } => {
            let input = inputs[0].data()?;
            require_numeric(op, input.dtype)?;
            EndpointSpec {
                dtype: input.dtype,
                shape: reduced_shape(&input.shape, axes.as_deref())?,
            }
        }
        OpDef::Cast { dtype } => EndpointSpec {
            dtype: *dtype,
            shape: inputs[0].data()?.shape.clone(),
        },
        OpDef::Assign | OpDef::AssignAdd | OpDef::AssignSub => {
            if !matches!(inputs[0].op, OpDef::Variable { .. }) {
                return Err(format!(
                    "{} target '{}' is not a variable",
                    op.kind(),
                    inputs[0].name
                ));
            }
            let target = inputs[0].data()?;
            let value = inputs[1].data()?;
            if target.dtype != value.dtype {
                return Err(format!(
                    "{} value has dtype {}, variable '{}' holds {}",
                    op.kind(),
                    value.dtype,
                    inputs[0].name,
                    target.dtype
                ));
            }
            if !matches!(op, OpDef::Assign) {
                require_numeric(op, target.dtype)?;
            }
            if !target.shape.is_compatible_with(&value.shape) {
                return Err(format!(
                    "{} value shape {} does not fit variable shape {}",
                    op.kind(),
                    value.shape,
                    target.shape
                ));
            }
            target.clone()
        }
    };
    if spec.shape.fixed_product().is_none() {
        return Err(format!("shape {} overflows the element count", spec.shape));
    }
    Ok(OutputSignature::Data(spec))
}

fn require_numeric(op: &OpDef, dtype: DType) -> Result<(), String> {
    if dtype.is_numeric() {
        Ok(())
    } else {
        Err(format!("{} does not support {}", op.kind(), dtype))
    }
}

fn same_numeric_dtype(op: &OpDef, lhs: DType, rhs: DType) -> Result<DType, String> {
    if lhs != rhs {
        return Err(format!("{} operands disagree: {} vs {}", op.kind(), lhs, rhs));
    }
    require_numeric(op, lhs)?;
    Ok(lhs)
}

/// Equal-rank operands merge dim by dim; a rank-0 operand broadcasts against the other.
fn broadcast_scalar(
    op: &OpDef,
    lhs: &DeclaredShape,
    rhs: &DeclaredShape,
) -> Result<DeclaredShape, String> {
    if lhs.rank() == 0 {
        return Ok(rhs.clone());
    }
    if rhs.rank() == 0 {
        return Ok(lhs.clone());
    }
    if !lhs.is_compatible_with(rhs) {
        return Err(format!(
            "{} operand shapes are incompatible: {} vs {}",
            op.kind(),
            lhs,
            rhs
        ));
    }
    let dims = lhs
        .dims()
        .iter()
        .zip(rhs.dims())
        .map(|(a, b)| match (a, b) {
            (Dim::Fixed(size), _) | (_, Dim::Fixed(size)) => Dim::Fixed(*size),
            _ => Dim::Wildcard,
        })
        .collect::<Vec<_>>();
    Ok(DeclaredShape::new(dims))
}

fn matrix_dims(shape: &DeclaredShape, transpose: bool) -> (Dim, Dim) {
    let dims = shape.dims();
    if transpose {
        (dims[1], dims[0])
    } else {
        (dims[0], dims[1])
    }
}

fn reduced_shape(shape: &DeclaredShape, axes: Option<&[usize]>) -> Result<DeclaredShape, String> {
    let Some(axes) = axes else {
        return Ok(DeclaredShape::scalar());
    };
    let mut seen = vec![false; shape.rank()];
    for &axis in axes {
        match seen.get_mut(axis) {
            Some(flag) if !*flag => *flag = true,
            Some(_) => return Err(format!("reduction axis {axis} listed twice")),
            None => {
                return Err(format!(
                    "reduction axis {axis} out of range for shape {shape}"
                ))
            }
        }
    }
    let dims = shape
        .dims()
        .iter()
        .zip(&seen)
        .filter(|(_, reduced)| !**reduced)
        .map(|(dim, _)| *dim)
        .collect::<Vec<_>>();
    Ok(DeclaredShape::new(dims))
}
