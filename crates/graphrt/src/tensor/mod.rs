//! Tensor element types, declared shapes, native storage, and endpoint-bound buffers.

pub mod buffer;
pub mod dtype;
pub mod element;
pub mod raw;
pub mod shape;

pub use buffer::TypedBuffer;
pub use dtype::DType;
pub use element::{Element, TensorValue};
pub use raw::{checked_byte_len, LayoutError, RawTensor};
pub use shape::{checked_element_count, DeclaredShape, Dim, ResolveError};
