//! Typed, shaped buffers bound to graph endpoints.

use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::graph::{Endpoint, EndpointSpec, GraphHandle, OutputSignature};

use super::dtype::DType;
use super::element::{with_values, Element, TensorValue};
use super::raw::RawTensor;
use super::shape::{checked_element_count, DeclaredShape, ResolveError};

/// One concrete instance of data for one graph endpoint.
///
/// Storage is created lazily on the first write or result adoption. It is reused in place while
/// the element count stays the same and replaced wholesale when the count changes or a reset is
/// requested. A failed write leaves the previous storage untouched.
#[derive(Debug)]
pub struct TypedBuffer {
    endpoint: Endpoint,
    signature: OutputSignature,
    /// Declared shape with wildcards possibly replaced by bind-time caller values.
    bound: DeclaredShape,
    storage: Option<RawTensor>,
}

impl TypedBuffer {
    /// Binds to `name` with its declared shape and dtype. Control-only operations are accepted
    /// and yield a buffer that can never hold data.
    pub fn new(graph: &GraphHandle, name: &str) -> Result<TypedBuffer> {
        let (endpoint, signature) = graph.endpoint(name)?;
        let bound = signature
            .data()
            .map(|spec| spec.shape.clone())
            .unwrap_or_default();
        Ok(TypedBuffer {
            endpoint,
            signature: signature.clone(),
            bound,
            storage: None,
        })
    }

    /// Binds to `name` after checking the caller's expectations against the declaration.
    ///
    /// The dtype must match exactly. The shape must have the same rank and agree on every fixed
    /// dimension; wildcard dimensions take the caller's value (a negative value keeps the
    /// wildcard).
    pub fn bind(
        graph: &GraphHandle,
        name: &str,
        expected_shape: &[i64],
        expected_type: DType,
    ) -> Result<TypedBuffer> {
        let (endpoint, spec) = graph.lookup_endpoint(name)?;
        if spec.dtype != expected_type {
            return Err(RuntimeError::TypeMismatch {
                name: name.to_string(),
                expected: spec.dtype.to_string(),
                actual: expected_type.to_string(),
            });
        }

        let expected = DeclaredShape::from_signed(expected_shape);
        if !spec.shape.is_compatible_with(&expected) {
            return Err(RuntimeError::ShapeMismatch {
                name: name.to_string(),
                detail: format!("declared {}, requested {}", spec.shape, expected),
            });
        }
        let bound = DeclaredShape::new(
            spec.shape
                .dims()
                .iter()
                .zip(expected.dims())
                .map(|(declared, requested)| {
                    if declared.is_wildcard() {
                        *requested
                    } else {
                        *declared
                    }
                })
                .collect::<Vec<_>>(),
        );

        Ok(TypedBuffer {
            endpoint,
            signature: OutputSignature::Data(spec),
            bound,
            storage: None,
        })
    }

    /// Binds with the dtype of `T`.
    pub fn bind_as<T: Element>(
        graph: &GraphHandle,
        name: &str,
        expected_shape: &[i64],
    ) -> Result<TypedBuffer> {
        TypedBuffer::bind(graph, name, expected_shape, T::DTYPE)
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn signature(&self) -> &OutputSignature {
        &self.signature
    }

    /// Declared element type; `None` for control-only operations.
    pub fn element_type(&self) -> Option<DType> {
        self.signature.data().map(|spec| spec.dtype)
    }

    pub fn declared_shape(&self) -> Option<&DeclaredShape> {
        self.signature.data().map(|spec| &spec.shape)
    }

    pub fn bound_shape(&self) -> &DeclaredShape {
        &self.bound
    }

    /// Resolved shape; empty while the buffer holds no data.
    pub fn shape(&self) -> &[usize] {
        self.storage.as_ref().map(RawTensor::dims).unwrap_or(&[])
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn element_count(&self) -> usize {
        self.storage.as_ref().map_or(0, RawTensor::element_count)
    }

    pub fn has_data(&self) -> bool {
        self.storage.is_some()
    }

    pub fn raw(&self) -> Option<&RawTensor> {
        self.storage.as_ref()
    }

    /// Address of the current allocation, for identity checks across writes.
    pub fn data_ptr(&self) -> Option<*const u8> {
        self.storage.as_ref().map(RawTensor::as_ptr)
    }

    /// Drops the storage; the shape becomes empty and reads fail.
    pub fn clear(&mut self) {
        self.storage = None;
    }

    pub fn set_data<T: Element>(&mut self, values: &[T]) -> Result<()> {
        self.set_data_with_reset(values, false)
    }

    /// Writes `values`, reallocating when required or when `reset` is set.
    pub fn set_data_with_reset<T: Element>(&mut self, values: &[T], reset: bool) -> Result<()> {
        let spec = self.data_spec(T::DTYPE)?;

        if !reset {
            if let Some(storage) = self.storage.as_mut() {
                if storage.dtype() == T::DTYPE && storage.element_count() == values.len() {
                    storage.write_slice(values);
                    return Ok(());
                }
            }
        }

        let dims = self.resolve_dims(&spec, values.len())?;
        let tensor = RawTensor::from_slice(dims, values).map_err(|err| self.layout_error(err))?;
        self.replace_storage(tensor);
        Ok(())
    }

    /// Writes `values` with an explicit resolved shape.
    pub fn set_data_with_shape<T: Element>(&mut self, values: &[T], dims: &[usize]) -> Result<()> {
        let spec = self.data_spec(T::DTYPE)?;
        if !spec.shape.accepts(dims) {
            return Err(RuntimeError::ShapeMismatch {
                name: self.name().to_string(),
                detail: format!("shape {:?} is not an instance of {}", dims, spec.shape),
            });
        }
        let count = checked_element_count(dims).ok_or_else(|| RuntimeError::ShapeMismatch {
            name: self.name().to_string(),
            detail: format!("shape {:?} overflows the element count", dims),
        })?;
        if count != values.len() {
            return Err(RuntimeError::ShapeMismatch {
                name: self.name().to_string(),
                detail: format!("shape {:?} holds {} elements, got {}", dims, count, values.len()),
            });
        }

        if let Some(storage) = self.storage.as_mut() {
            if storage.dtype() == T::DTYPE && storage.dims() == dims {
                storage.write_slice(values);
                return Ok(());
            }
        }
        let tensor =
            RawTensor::from_slice(dims.to_vec(), values).map_err(|err| self.layout_error(err))?;
        self.replace_storage(tensor);
        Ok(())
    }

    /// Writes a dynamically typed payload.
    pub fn set_value(&mut self, value: &TensorValue) -> Result<()> {
        with_values!(value, values => self.set_data(values.as_slice()))
    }

    pub fn get_data<T: Element>(&self) -> Result<Vec<T>> {
        let storage = self.readable(T::DTYPE)?;
        Ok(T::decode(storage.bytes()))
    }

    /// Replaces the contents of `out` with the buffer's elements.
    pub fn get_data_into<T: Element>(&self, out: &mut Vec<T>) -> Result<()> {
        let storage = self.readable(T::DTYPE)?;
        out.clear();
        out.extend(T::decode(storage.bytes()));
        Ok(())
    }

    pub fn get_value(&self) -> Result<TensorValue> {
        self.storage
            .as_ref()
            .map(RawTensor::to_value)
            .ok_or_else(|| RuntimeError::EmptyBuffer(self.name().to_string()))
    }

    /// Checks that an execution result can be adopted without modifying the buffer.
    pub(crate) fn check_result(&self, result: Option<&RawTensor>) -> Result<()> {
        let Some(tensor) = result else {
            return Ok(());
        };
        let Some(spec) = self.signature.data() else {
            return Err(RuntimeError::TypeMismatch {
                name: self.name().to_string(),
                expected: "none".to_string(),
                actual: tensor.dtype().to_string(),
            });
        };
        if tensor.dtype() != spec.dtype {
            return Err(RuntimeError::TypeMismatch {
                name: self.name().to_string(),
                expected: spec.dtype.to_string(),
                actual: tensor.dtype().to_string(),
            });
        }
        if !spec.shape.accepts(tensor.dims()) {
            return Err(RuntimeError::ShapeMismatch {
                name: self.name().to_string(),
                detail: format!(
                    "result shape {:?} is not an instance of {}",
                    tensor.dims(),
                    spec.shape
                ),
            });
        }
        Ok(())
    }

    /// Replaces storage and shape wholesale; `None` clears the buffer.
    pub(crate) fn adopt_result(&mut self, result: Option<RawTensor>) {
        self.storage = result;
    }

    fn data_spec(&self, actual: DType) -> Result<EndpointSpec> {
        match &self.signature {
            OutputSignature::Data(spec) if spec.dtype == actual => Ok(spec.clone()),
            OutputSignature::Data(spec) => Err(RuntimeError::TypeMismatch {
                name: self.name().to_string(),
                expected: spec.dtype.to_string(),
                actual: actual.to_string(),
            }),
            OutputSignature::Control => Err(RuntimeError::TypeMismatch {
                name: self.name().to_string(),
                expected: "none".to_string(),
                actual: actual.to_string(),
            }),
        }
    }

    fn readable(&self, requested: DType) -> Result<&RawTensor> {
        if let Some(dtype) = self.element_type() {
            if dtype != requested {
                return Err(RuntimeError::TypeMismatch {
                    name: self.name().to_string(),
                    expected: dtype.to_string(),
                    actual: requested.to_string(),
                });
            }
        }
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| RuntimeError::EmptyBuffer(self.name().to_string()))?;
        if storage.dtype() != requested {
            return Err(RuntimeError::TypeMismatch {
                name: self.name().to_string(),
                expected: storage.dtype().to_string(),
                actual: requested.to_string(),
            });
        }
        Ok(storage)
    }

    /// Uses the bound shape when it is concrete and fits, otherwise resolves the declaration.
    fn resolve_dims(&self, spec: &EndpointSpec, len: usize) -> Result<Vec<usize>> {
        if let Some(dims) = self.bound.concrete() {
            if checked_element_count(&dims) == Some(len) {
                return Ok(dims);
            }
        }
        spec.shape.resolve(len).map_err(|err| match err {
            ResolveError::Mismatch { expected } => RuntimeError::ShapeMismatch {
                name: self.name().to_string(),
                detail: format!(
                    "shape {} holds {} elements, got {}",
                    spec.shape, expected, len
                ),
            },
            ResolveError::Overflow => RuntimeError::ShapeMismatch {
                name: self.name().to_string(),
                detail: format!("shape {} overflows the element count", spec.shape),
            },
            ResolveError::Indivisible => RuntimeError::IndivisibleShape {
                name: self.name().to_string(),
                shape: spec.shape.to_string(),
                len,
            },
        })
    }

    fn replace_storage(&mut self, tensor: RawTensor) {
        debug!(
            endpoint = %self.endpoint,
            dtype = %tensor.dtype(),
            dims = ?tensor.dims(),
            "allocated buffer storage"
        );
        self.storage = Some(tensor);
    }

    fn layout_error(&self, err: super::raw::LayoutError) -> RuntimeError {
        RuntimeError::ShapeMismatch {
            name: self.name().to_string(),
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphDef, ImportOptions, NodeDef, OpDef};

    fn graph() -> GraphHandle {
        let def = GraphDef::new()
            .with_node(NodeDef::new(
                "x",
                OpDef::Placeholder {
                    dtype: DType::F32,
                    shape: DeclaredShape::from_signed(&[-1, 3]),
                },
            ))
            .with_node(NodeDef::new(
                "m",
                OpDef::Placeholder {
                    dtype: DType::I32,
                    shape: DeclaredShape::from_signed(&[2, 2]),
                },
            ))
            .with_node(NodeDef::new(
                "grid",
                OpDef::Placeholder {
                    dtype: DType::F64,
                    shape: DeclaredShape::from_signed(&[-1, -1]),
                },
            ))
            .with_node(NodeDef::new("noop", OpDef::NoOp));
        GraphHandle::from_def(def, &ImportOptions::default()).unwrap()
    }

    #[test]
    fn bind_checks_dtype_exactly() {
        let graph = graph();
        let err = TypedBuffer::bind(&graph, "x", &[2, 3], DType::F64).unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn bind_checks_rank_and_fixed_dims() {
        let graph = graph();
        assert!(matches!(
            TypedBuffer::bind(&graph, "x", &[6], DType::F32),
            Err(RuntimeError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            TypedBuffer::bind(&graph, "x", &[2, 4], DType::F32),
            Err(RuntimeError::ShapeMismatch { .. })
        ));
        let buffer = TypedBuffer::bind(&graph, "x", &[5, 3], DType::F32).unwrap();
        assert_eq!(buffer.bound_shape(), &DeclaredShape::from_signed(&[5, 3]));
        assert!(!buffer.has_data());
    }

    #[test]
    fn bind_reports_missing_endpoint() {
        let graph = graph();
        assert!(matches!(
            TypedBuffer::bind(&graph, "nope", &[1], DType::F32),
            Err(RuntimeError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn set_data_resolves_wildcard() {
        let graph = graph();
        let mut buffer = TypedBuffer::bind_as::<f32>(&graph, "x", &[-1, 3]).unwrap();
        buffer.set_data(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(buffer.shape(), &[2, 3]);
        assert_eq!(buffer.element_count(), 6);
    }

    #[test]
    fn bound_shape_used_when_it_fits() {
        let graph = graph();
        let mut buffer = TypedBuffer::bind_as::<f32>(&graph, "x", &[4, 3]).unwrap();
        buffer.set_data(&[0.0f32; 12]).unwrap();
        assert_eq!(buffer.shape(), &[4, 3]);
        buffer.set_data(&[0.0f32; 9]).unwrap();
        assert_eq!(buffer.shape(), &[3, 3]);
    }

    #[test]
    fn indivisible_write_keeps_previous_storage() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "x").unwrap();
        buffer.set_data(&[1.0f32, 2.0, 3.0]).unwrap();
        let err = buffer.set_data(&[1.0f32; 7]).unwrap_err();
        assert!(matches!(err, RuntimeError::IndivisibleShape { len: 7, .. }));
        assert_eq!(buffer.shape(), &[1, 3]);
        assert_eq!(buffer.get_data::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn fixed_shape_rejects_wrong_length() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "m").unwrap();
        assert!(matches!(
            buffer.set_data(&[1i32, 2, 3]),
            Err(RuntimeError::ShapeMismatch { .. })
        ));
        buffer.set_data(&[1i32, 2, 3, 4]).unwrap();
        assert_eq!(buffer.shape(), &[2, 2]);
    }

    #[test]
    fn ambiguous_shape_needs_explicit_dims() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "grid").unwrap();
        assert!(matches!(
            buffer.set_data(&[0.0f64; 6]),
            Err(RuntimeError::IndivisibleShape { .. })
        ));
        buffer.set_data_with_shape(&[0.0f64; 6], &[3, 2]).unwrap();
        assert_eq!(buffer.shape(), &[3, 2]);
        assert!(matches!(
            buffer.set_data_with_shape(&[0.0f64; 6], &[6]),
            Err(RuntimeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn same_count_writes_reuse_allocation() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "x").unwrap();
        buffer.set_data(&[1.0f32; 6]).unwrap();
        let first = buffer.data_ptr();
        buffer.set_data(&[2.0f32; 6]).unwrap();
        assert_eq!(buffer.data_ptr(), first);
        assert_eq!(buffer.get_data::<f32>().unwrap(), vec![2.0; 6]);

        buffer.set_data(&[3.0f32; 9]).unwrap();
        assert_eq!(buffer.shape(), &[3, 3]);
    }

    #[test]
    fn reset_writes_reallocate_and_resolve_again() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "x").unwrap();
        buffer.set_data(&[1.0f32; 6]).unwrap();
        let first = buffer.data_ptr();
        buffer.set_data_with_reset(&[2.0f32; 6], false).unwrap();
        assert_eq!(buffer.data_ptr(), first);

        buffer.set_data_with_reset(&[3.0f32; 6], true).unwrap();
        assert_ne!(buffer.data_ptr(), first);
        assert_eq!(buffer.shape(), &[2, 3]);
        assert_eq!(buffer.get_data::<f32>().unwrap(), vec![3.0; 6]);

        // An in-place write keeps the explicit dims; a reset goes back to the declaration.
        let mut grid = TypedBuffer::new(&graph, "grid").unwrap();
        grid.set_data_with_shape(&[0.0f64; 6], &[3, 2]).unwrap();
        grid.set_data_with_reset(&[1.0f64; 6], false).unwrap();
        assert_eq!(grid.shape(), &[3, 2]);
        assert!(matches!(
            grid.set_data_with_reset(&[2.0f64; 6], true),
            Err(RuntimeError::IndivisibleShape { .. })
        ));
        assert_eq!(grid.get_data::<f64>().unwrap(), vec![1.0; 6]);
    }

    #[test]
    fn overflowing_shapes_are_rejected_without_allocating() {
        let graph = graph();
        let mut buffer = TypedBuffer::bind_as::<f64>(&graph, "grid", &[1 << 32, 1 << 32]).unwrap();
        assert!(matches!(
            buffer.set_data(&[1.0f64]),
            Err(RuntimeError::IndivisibleShape { .. })
        ));
        assert!(matches!(
            buffer.set_data_with_shape(&[1.0f64], &[1 << 32, 1 << 32]),
            Err(RuntimeError::ShapeMismatch { .. })
        ));
        assert!(!buffer.has_data());
    }

    #[test]
    fn typed_access_checks_element_type() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "x").unwrap();
        assert!(matches!(
            buffer.set_data(&[1.0f64, 2.0, 3.0]),
            Err(RuntimeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            buffer.get_data::<f32>(),
            Err(RuntimeError::EmptyBuffer(_))
        ));
        buffer.set_data(&[1.0f32, 2.0, 3.0]).unwrap();
        assert!(matches!(
            buffer.get_data::<i32>(),
            Err(RuntimeError::TypeMismatch { .. })
        ));
        let mut out = vec![9.0f32];
        buffer.get_data_into(&mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn control_buffers_never_hold_data() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "noop").unwrap();
        assert_eq!(buffer.element_type(), None);
        let err = buffer.set_data(&[1.0f32]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::TypeMismatch { ref expected, .. } if expected == "none"
        ));

        assert!(buffer.check_result(None).is_ok());
        let stray = RawTensor::scalar(1.0f32);
        assert!(matches!(
            buffer.check_result(Some(&stray)),
            Err(RuntimeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn clear_empties_shape() {
        let graph = graph();
        let mut buffer = TypedBuffer::new(&graph, "x").unwrap();
        buffer
            .set_value(&TensorValue::from(vec![1.0f32, 2.0, 3.0]))
            .unwrap();
        buffer.clear();
        assert!(buffer.shape().is_empty());
        assert!(buffer.get_value().is_err());
    }
}
