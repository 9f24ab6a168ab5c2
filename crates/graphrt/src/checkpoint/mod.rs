//! Saving and restoring session variable state.
//!
//! A checkpoint for prefix `p` lives at `p.ckpt`. Saving exports every initialized variable from
//! the session; restoring validates each entry against the graph's variable declarations before
//! handing the values to the engine, so a rejected file leaves the session unchanged.

mod loader;
mod saver;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::error::{Code, Result, RuntimeError};
use crate::graph::{GraphHandle, OpDef};
use crate::session::SessionHandle;
use crate::tensor::LayoutError;

const MAGIC: &[u8; 8] = b"GRTCKPT1";
const VERSION: u32 = 1;

pub const CHECKPOINT_EXTENSION: &str = "ckpt";

#[derive(Debug, Error)]
pub(crate) enum CheckpointFormatError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid checkpoint magic header")]
    BadMagic,
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown dtype tag {0}")]
    UnknownDType(u32),
    #[error("tensor name is not valid utf-8")]
    InvalidName,
    #[error("dimension {0} does not fit in memory")]
    DimOverflow(u64),
    #[error("tensor dims {0:?} exceed the address space")]
    ShapeOverflow(Vec<usize>),
    #[error("checkpoint ends in the middle of a tensor")]
    Truncated,
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl CheckpointFormatError {
    fn code(&self) -> Code {
        match self {
            CheckpointFormatError::Io(err) => match err.kind() {
                io::ErrorKind::NotFound => Code::NotFound,
                io::ErrorKind::PermissionDenied => Code::PermissionDenied,
                io::ErrorKind::UnexpectedEof => Code::DataLoss,
                _ => Code::Unknown,
            },
            _ => Code::DataLoss,
        }
    }
}

impl From<CheckpointFormatError> for RuntimeError {
    fn from(err: CheckpointFormatError) -> Self {
        RuntimeError::checkpoint(err.code(), err.to_string())
    }
}

/// File written for `prefix`: the prefix with `.ckpt` appended.
pub fn checkpoint_path(prefix: impl AsRef<Path>) -> PathBuf {
    let mut path = OsString::from(prefix.as_ref().as_os_str());
    path.push(".");
    path.push(CHECKPOINT_EXTENSION);
    PathBuf::from(path)
}

/// Writes every initialized variable of `session` and returns the checkpoint path.
pub fn save(
    graph: &GraphHandle,
    session: &SessionHandle,
    prefix: impl AsRef<Path>,
) -> Result<PathBuf> {
    ensure_same_graph(graph, session)?;
    let variables = session.export_variables().map_err(as_checkpoint_error)?;
    let path = checkpoint_path(prefix);
    saver::write_checkpoint(&path, &variables)?;
    debug!(path = %path.display(), variables = variables.len(), "saved checkpoint");
    Ok(path)
}

/// Loads `<prefix>.ckpt` into the session's variables.
pub fn restore(
    graph: &GraphHandle,
    session: &mut SessionHandle,
    prefix: impl AsRef<Path>,
) -> Result<()> {
    ensure_same_graph(graph, session)?;
    let path = checkpoint_path(prefix);
    let variables = loader::read_checkpoint(&path)?;

    for (name, tensor) in &variables {
        let (endpoint, spec) = graph.lookup_endpoint(name).map_err(|_| {
            RuntimeError::checkpoint(
                Code::NotFound,
                format!("checkpoint entry '{name}' has no variable in the graph"),
            )
        })?;
        let is_variable = graph
            .node(endpoint.node_index())
            .is_some_and(|node| matches!(node.op(), OpDef::Variable { .. }));
        if !is_variable {
            return Err(RuntimeError::checkpoint(
                Code::InvalidArgument,
                format!("checkpoint entry '{name}' does not name a variable"),
            ));
        }
        if tensor.dtype() != spec.dtype || !spec.shape.accepts(tensor.dims()) {
            return Err(RuntimeError::checkpoint(
                Code::InvalidArgument,
                format!(
                    "checkpoint entry '{name}' is {} {:?}, variable is {} {}",
                    tensor.dtype(),
                    tensor.dims(),
                    spec.dtype,
                    spec.shape
                ),
            ));
        }
    }

    let count = variables.len();
    session
        .import_variables(variables)
        .map_err(as_checkpoint_error)?;
    debug!(path = %path.display(), variables = count, "restored checkpoint");
    Ok(())
}

fn ensure_same_graph(graph: &GraphHandle, session: &SessionHandle) -> Result<()> {
    if session.graph().id() == graph.id() {
        Ok(())
    } else {
        Err(RuntimeError::checkpoint(
            Code::InvalidArgument,
            format!(
                "session is bound to {}, not {}",
                session.graph().id(),
                graph.id()
            ),
        ))
    }
}

fn as_checkpoint_error(err: RuntimeError) -> RuntimeError {
    match err {
        RuntimeError::ExecutionFailed { code, message } => RuntimeError::checkpoint(code, message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, RawTensor};

    #[test]
    fn path_appends_extension() {
        assert_eq!(
            checkpoint_path("/tmp/model/step-10"),
            PathBuf::from("/tmp/model/step-10.ckpt")
        );
    }

    #[test]
    fn file_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.ckpt");
        let entries = vec![
            ("w".to_string(), RawTensor::from_slice(vec![2], &[1.5f32, -2.0]).unwrap()),
            ("flag".to_string(), RawTensor::scalar(true)),
            ("step".to_string(), RawTensor::zeroed(DType::I64, vec![]).unwrap()),
        ];
        saver::write_checkpoint(&path, &entries).unwrap();
        assert_eq!(loader::read_checkpoint(&path).unwrap(), entries);
    }

    #[test]
    fn corrupt_files_report_data_loss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ckpt");
        std::fs::write(&path, b"NOTACKPT\x01\x00\x00\x00").unwrap();
        let err = RuntimeError::from(loader::read_checkpoint(&path).unwrap_err());
        assert_eq!(err.code(), Some(Code::DataLoss));

        let entries = vec![("w".to_string(), RawTensor::scalar(1.0f64))];
        saver::write_checkpoint(&path, &entries).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        let err = RuntimeError::from(loader::read_checkpoint(&path).unwrap_err());
        assert_eq!(err.code(), Some(Code::DataLoss));
    }

    #[test]
    fn overflowing_dims_report_data_loss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.ckpt");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"w");
        bytes.extend_from_slice(&DType::F32.tag().to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 62).to_le_bytes());
        bytes.extend_from_slice(&8u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = loader::read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, CheckpointFormatError::ShapeOverflow(_)));
        assert_eq!(RuntimeError::from(err).code(), Some(Code::DataLoss));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader::read_checkpoint(&dir.path().join("none.ckpt")).unwrap_err();
        let err = RuntimeError::from(err);
        assert_eq!(err.code(), Some(Code::NotFound));
    }
}
