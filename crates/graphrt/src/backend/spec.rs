//! Contract between the runtime core and execution engines.

use std::sync::Arc;

use thiserror::Error;

use crate::error::Code;
use crate::graph::{Endpoint, GraphHandle, OperationHandle};
use crate::session::SessionOptions;
use crate::tensor::RawTensor;

/// Engine failure carrying a status code and the engine's message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: Code,
    pub message: String,
}

impl BackendError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Named variable values exported from or imported into a session.
pub type VariableSnapshot = Vec<(String, RawTensor)>;

/// Factory for sessions bound to one graph.
pub trait ExecutionBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., "cpu").
    fn backend_name(&self) -> &str;

    /// Creates a session for `graph`; rejects options the engine cannot honor.
    fn open_session(
        &self,
        graph: Arc<GraphHandle>,
        options: &SessionOptions,
    ) -> BackendResult<Box<dyn BackendSession>>;
}

/// Live engine session holding per-session state such as variable values.
pub trait BackendSession: Send {
    /// Runs one atomic step.
    ///
    /// `inputs` and `input_tensors` are parallel arrays. The result holds one entry per output
    /// endpoint, in order; `None` means the endpoint produced no data. Every target operation is
    /// executed even when its value is not fetched.
    fn run(
        &mut self,
        inputs: &[Endpoint],
        input_tensors: &[&RawTensor],
        outputs: &[Endpoint],
        targets: &[OperationHandle],
    ) -> BackendResult<Vec<Option<RawTensor>>>;

    /// Returns every initialized variable by node name.
    fn export_variables(&self) -> BackendResult<VariableSnapshot>;

    /// Replaces variable values; names must refer to variables of the bound graph.
    fn import_variables(&mut self, variables: VariableSnapshot) -> BackendResult<()>;

    /// Releases engine resources. Called at most once.
    fn close(&mut self) -> BackendResult<()>;
}
