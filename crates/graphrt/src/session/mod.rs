//! Sessions: one live engine instance bound to one loaded graph.

mod options;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{self, BackendError, BackendSession, VariableSnapshot};
use crate::error::{Code, Result, RuntimeError};
use crate::graph::{Endpoint, GraphHandle, OperationHandle};
use crate::tensor::RawTensor;

pub use options::{SessionOptions, DEFAULT_BACKEND};

/// Owns one backend session for one graph.
///
/// The graph is shared through an `Arc`, so it outlives every session created for it. Closing
/// releases the engine session even when the engine reports a failure; dropping an open session
/// closes it.
pub struct SessionHandle {
    graph: Arc<GraphHandle>,
    backend_name: String,
    inner: Option<Box<dyn BackendSession>>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("graph", &self.graph.id())
            .field("backend", &self.backend_name)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl SessionHandle {
    pub fn create(graph: Arc<GraphHandle>, options: &SessionOptions) -> Result<SessionHandle> {
        let backend = backend::create_backend(&options.backend).ok_or_else(|| {
            RuntimeError::SessionCreateFailed(format!(
                "backend '{}' is not registered (available: {:?})",
                options.backend,
                backend::list_backends()
            ))
        })?;
        let inner = backend
            .open_session(Arc::clone(&graph), options)
            .map_err(|err| RuntimeError::SessionCreateFailed(err.to_string()))?;
        debug!(graph = %graph.id(), backend = %options.backend, "created session");
        Ok(SessionHandle {
            graph,
            backend_name: backend.backend_name().to_string(),
            inner: Some(inner),
        })
    }

    pub fn graph(&self) -> &Arc<GraphHandle> {
        &self.graph
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Runs one atomic step: feeds `input_tensors` to `input_endpoints`, fetches
    /// `output_endpoints` in order, and executes `targets`.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            graph = %self.graph.id(),
            inputs = input_endpoints.len(),
            outputs = output_endpoints.len(),
            targets = targets.len()
        )
    )]
    pub fn execute(
        &mut self,
        input_endpoints: &[Endpoint],
        input_tensors: &[&RawTensor],
        output_endpoints: &[Endpoint],
        targets: &[OperationHandle],
    ) -> Result<Vec<Option<RawTensor>>> {
        if input_endpoints.len() != input_tensors.len() {
            return Err(RuntimeError::execution(
                Code::InvalidArgument,
                format!(
                    "{} input endpoints but {} input tensors",
                    input_endpoints.len(),
                    input_tensors.len()
                ),
            ));
        }
        for endpoint in input_endpoints.iter().chain(output_endpoints) {
            if !self.graph.owns_endpoint(endpoint) {
                return Err(RuntimeError::execution(
                    Code::InvalidArgument,
                    format!(
                        "endpoint '{endpoint}' belongs to {} not {}",
                        endpoint.graph_id(),
                        self.graph.id()
                    ),
                ));
            }
        }
        if let Some(target) = targets.iter().find(|op| !self.graph.owns_operation(op)) {
            return Err(RuntimeError::execution(
                Code::InvalidArgument,
                format!("operation '{}' belongs to another graph", target.name()),
            ));
        }

        let session = self.open_session()?;
        let results = session
            .run(input_endpoints, input_tensors, output_endpoints, targets)
            .map_err(from_backend)?;
        if results.len() != output_endpoints.len() {
            return Err(RuntimeError::execution(
                Code::Internal,
                format!(
                    "engine returned {} results for {} outputs",
                    results.len(),
                    output_endpoints.len()
                ),
            ));
        }
        Ok(results)
    }

    /// Snapshot of all initialized variables, keyed by node name.
    pub fn export_variables(&self) -> Result<VariableSnapshot> {
        match &self.inner {
            Some(session) => session.export_variables().map_err(from_backend),
            None => Err(closed_error()),
        }
    }

    pub fn import_variables(&mut self, variables: VariableSnapshot) -> Result<()> {
        self.open_session()?
            .import_variables(variables)
            .map_err(from_backend)
    }

    /// Closes the engine session. Resources are released even if the engine reports an error.
    pub fn close(&mut self) -> Result<()> {
        let mut session = self
            .inner
            .take()
            .ok_or_else(|| RuntimeError::SessionCloseFailed("session already closed".to_string()))?;
        let outcome = session.close();
        drop(session);
        debug!(graph = %self.graph.id(), ok = outcome.is_ok(), "closed session");
        outcome.map_err(|err| RuntimeError::SessionCloseFailed(err.to_string()))
    }

    fn open_session(&mut self) -> Result<&mut Box<dyn BackendSession>> {
        self.inner.as_mut().ok_or_else(closed_error)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.inner.is_some() {
            if let Err(err) = self.close() {
                warn!(graph = %self.graph.id(), error = %err, "session close failed during drop");
            }
        }
    }
}

fn from_backend(err: BackendError) -> RuntimeError {
    RuntimeError::ExecutionFailed {
        code: err.code,
        message: err.message,
    }
}

fn closed_error() -> RuntimeError {
    RuntimeError::execution(Code::FailedPrecondition, "session is closed")
}
