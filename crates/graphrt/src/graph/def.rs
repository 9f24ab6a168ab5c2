//! Serializable graph definition, the on-disk form loaded into a
//! [`GraphHandle`](super::GraphHandle).

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{DType, DeclaredShape, TensorValue};

pub const GRAPHDEF_VERSION: &str = "graphrt.graphdef.v1";

fn default_version() -> String {
    GRAPHDEF_VERSION.to_string()
}

/// Constant payload embedded in a graph definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorLiteral {
    pub shape: Vec<usize>,
    pub value: TensorValue,
}

impl TensorLiteral {
    pub fn new(shape: Vec<usize>, value: impl Into<TensorValue>) -> Self {
        Self {
            shape,
            value: value.into(),
        }
    }

    pub fn scalar(value: impl Into<TensorValue>) -> Self {
        Self::new(Vec::new(), value)
    }
}

/// Operation kinds understood by the loader and the reference interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpDef {
    Placeholder {
        dtype: DType,
        shape: DeclaredShape,
    },
    Const {
        literal: TensorLiteral,
    },
    /// Mutable state owned by a session; uninitialized until assigned or restored.
    Variable {
        dtype: DType,
        shape: DeclaredShape,
    },
    Identity,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Square,
    MatMul {
        #[serde(default)]
        transpose_a: bool,
        #[serde(default)]
        transpose_b: bool,
    },
    ReduceSum {
        #[serde(default)]
        axes: Option<Vec<usize>>,
    },
    ReduceMean {
        #[serde(default)]
        axes: Option<Vec<usize>>,
    },
    Cast {
        dtype: DType,
    },
    Assign,
    AssignAdd,
    AssignSub,
    NoOp,
}

impl OpDef {
    pub fn kind(&self) -> &'static str {
        match self {
            OpDef::Placeholder { .. } => "placeholder",
            OpDef::Const { .. } => "const",
            OpDef::Variable { .. } => "variable",
            OpDef::Identity => "identity",
            OpDef::Add => "add",
            OpDef::Sub => "sub",
            OpDef::Mul => "mul",
            OpDef::Div => "div",
            OpDef::Neg => "neg",
            OpDef::Square => "square",
            OpDef::MatMul { .. } => "mat_mul",
            OpDef::ReduceSum { .. } => "reduce_sum",
            OpDef::ReduceMean { .. } => "reduce_mean",
            OpDef::Cast { .. } => "cast",
            OpDef::Assign => "assign",
            OpDef::AssignAdd => "assign_add",
            OpDef::AssignSub => "assign_sub",
            OpDef::NoOp => "no_op",
        }
    }

    /// Number of data inputs the op consumes.
    pub fn arity(&self) -> usize {
        match self {
            OpDef::Placeholder { .. } | OpDef::Const { .. } | OpDef::Variable { .. } => 0,
            OpDef::NoOp => 0,
            OpDef::Identity
            | OpDef::Neg
            | OpDef::Square
            | OpDef::ReduceSum { .. }
            | OpDef::ReduceMean { .. }
            | OpDef::Cast { .. } => 1,
            OpDef::Add
            | OpDef::Sub
            | OpDef::Mul
            | OpDef::Div
            | OpDef::MatMul { .. }
            | OpDef::Assign
            | OpDef::AssignAdd
            | OpDef::AssignSub => 2,
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self, OpDef::Assign | OpDef::AssignAdd | OpDef::AssignSub)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: OpDef,
    /// Data inputs by node name; an optional `:0` output suffix is accepted.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Nodes that must run before this one without contributing data.
    #[serde(default)]
    pub control_inputs: Vec<String>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: OpDef) -> Self {
        Self {
            name: name.into(),
            op,
            inputs: Vec::new(),
            control_inputs: Vec::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_control_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.control_inputs = inputs.into_iter().map(Into::into).collect();
        self
    }
}

/// Complete graph definition with nodes in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default = "default_version")]
    pub version: String,
    pub nodes: Vec<NodeDef>,
}

impl Default for GraphDef {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum GraphDefError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("graph version '{found}' does not match expected '{expected}'")]
    VersionMismatch {
        found: String,
        expected: &'static str,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl GraphDef {
    pub fn new() -> Self {
        Self {
            version: GRAPHDEF_VERSION.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: NodeDef) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn push(&mut self, node: NodeDef) {
        self.nodes.push(node);
    }

    pub fn to_json_string(&self) -> Result<String, GraphDefError> {
        serde_json::to_string_pretty(self).map_err(GraphDefError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, GraphDefError> {
        let mut def: GraphDef = serde_json::from_str(src)?;
        def.version = normalize_version(def.version)?;
        Ok(def)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, GraphDefError> {
        let mut def: GraphDef = serde_json::from_slice(bytes)?;
        def.version = normalize_version(def.version)?;
        Ok(def)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, GraphDefError> {
        bincode::serialize(self).map_err(GraphDefError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, GraphDefError> {
        let mut def: GraphDef = bincode::deserialize(bytes)?;
        def.version = normalize_version(def.version)?;
        Ok(def)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphDefError> {
        fs::write(path, self.to_json_string()?).map_err(GraphDefError::from)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphDefError> {
        fs::write(path, self.to_bincode_bytes()?).map_err(GraphDefError::from)
    }
}

fn normalize_version(version: String) -> Result<String, GraphDefError> {
    if version.is_empty() || version == GRAPHDEF_VERSION {
        Ok(GRAPHDEF_VERSION.to_string())
    } else {
        Err(GraphDefError::VersionMismatch {
            found: version,
            expected: GRAPHDEF_VERSION,
        })
    }
}
