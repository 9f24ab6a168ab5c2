//! Graph execution runtime: load a serialized computation graph, bind named endpoints to typed
//! buffers, and run it through a pluggable execution backend.

pub use linkme;

pub mod backend;
pub mod checkpoint;
pub mod config;
mod env;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod session;
pub mod tensor;

pub use config::RuntimeConfig;
pub use error::{Code, Result, RuntimeError};
pub use graph::{
    Endpoint, EndpointSpec, GraphDef, GraphFormat, GraphHandle, ImportOptions, NodeDef, OpDef,
    OperationHandle, OutputSignature, TensorLiteral,
};
pub use runtime::{ExecutionCoordinator, Model, ModelOptions, NamedEndpointRegistry};
pub use session::{SessionHandle, SessionOptions};
pub use tensor::{DType, DeclaredShape, Dim, Element, RawTensor, TensorValue, TypedBuffer};
