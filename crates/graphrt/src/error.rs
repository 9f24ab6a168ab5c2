//! Error and status-code types shared by every runtime operation.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the runtime.
pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

/// Status codes reported by execution engines.
///
/// The numeric values are stable and follow the canonical status space used by graph runtimes, so
/// a code received from a backend can be logged or compared without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Returns the stable numeric value of the code.
    pub fn value(self) -> u32 {
        match self {
            Code::Ok => 0,
            Code::Cancelled => 1,
            Code::Unknown => 2,
            Code::InvalidArgument => 3,
            Code::DeadlineExceeded => 4,
            Code::NotFound => 5,
            Code::AlreadyExists => 6,
            Code::PermissionDenied => 7,
            Code::ResourceExhausted => 8,
            Code::FailedPrecondition => 9,
            Code::Aborted => 10,
            Code::OutOfRange => 11,
            Code::Unimplemented => 12,
            Code::Internal => 13,
            Code::Unavailable => 14,
            Code::DataLoss => 15,
            Code::Unauthenticated => 16,
        }
    }

    /// Reconstructs a code from its numeric value.
    pub fn from_value(value: u32) -> Option<Self> {
        let code = match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// Human-readable name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by graph loading, binding, and execution.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to load graph: {0}")]
    GraphLoadFailed(String),

    #[error("endpoint '{name}' not found: {reason}")]
    EndpointNotFound { name: String, reason: String },

    #[error("type mismatch for '{name}': endpoint expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("shape mismatch for '{name}': {detail}")]
    ShapeMismatch { name: String, detail: String },

    #[error("cannot resolve shape {shape} of '{name}' from {len} elements")]
    IndivisibleShape {
        name: String,
        shape: String,
        len: usize,
    },

    #[error("input '{0}' has no data")]
    MissingInputData(String),

    #[error("execution failed ({code}): {message}")]
    ExecutionFailed { code: Code, message: String },

    #[error("failed to create session: {0}")]
    SessionCreateFailed(String),

    #[error("failed to close session: {0}")]
    SessionCloseFailed(String),

    #[error("'{0}' is not registered")]
    NotRegistered(String),

    #[error("buffer '{0}' is empty")]
    EmptyBuffer(String),

    #[error("checkpoint error ({code}): {message}")]
    Checkpoint { code: Code, message: String },
}

impl RuntimeError {
    pub(crate) fn execution(code: Code, message: impl Into<String>) -> Self {
        RuntimeError::ExecutionFailed {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn checkpoint(code: Code, message: impl Into<String>) -> Self {
        RuntimeError::Checkpoint {
            code,
            message: message.into(),
        }
    }

    /// Returns the engine status code for execution and checkpoint failures.
    pub fn code(&self) -> Option<Code> {
        match self {
            RuntimeError::ExecutionFailed { code, .. } | RuntimeError::Checkpoint { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}
