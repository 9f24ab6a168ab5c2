//! Execution engine abstraction and the process-wide backend registry.

pub mod registry;
pub mod spec;

pub use registry::{create_backend, has_backend, list_backends, register_backend};
pub use spec::{BackendError, BackendResult, BackendSession, ExecutionBackend, VariableSnapshot};
