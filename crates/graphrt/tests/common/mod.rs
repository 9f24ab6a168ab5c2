#![allow(dead_code)]

use std::sync::Arc;

use graphrt::{
    DType, DeclaredShape, GraphDef, GraphHandle, ImportOptions, Model, ModelOptions, NodeDef,
    OpDef, TensorLiteral, TensorValue,
};
use tracing_subscriber::EnvFilter;

/// Registers the reference backend and installs a test-friendly subscriber once.
pub fn setup() {
    graphrt_backend_ref_cpu::register_cpu_backend();
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();
}

pub fn placeholder(name: &str, dtype: DType, dims: &[i64]) -> NodeDef {
    NodeDef::new(
        name,
        OpDef::Placeholder {
            dtype,
            shape: DeclaredShape::from_signed(dims),
        },
    )
}

pub fn variable(name: &str, dtype: DType, dims: &[i64]) -> NodeDef {
    NodeDef::new(
        name,
        OpDef::Variable {
            dtype,
            shape: DeclaredShape::from_signed(dims),
        },
    )
}

/// Rank-0 constant holding `value`, e.g. `scalar("one", vec![1i64])`.
pub fn scalar(name: &str, value: impl Into<TensorValue>) -> NodeDef {
    NodeDef::new(
        name,
        OpDef::Const {
            literal: TensorLiteral::scalar(value),
        },
    )
}

pub fn op(name: &str, op: OpDef, inputs: &[&str]) -> NodeDef {
    NodeDef::new(name, op).with_inputs(inputs.iter().copied())
}

/// `y = identity(x)` with `x: f32[-1, 3]`.
pub fn identity_graph() -> GraphDef {
    GraphDef::new()
        .with_node(placeholder("x", DType::F32, &[-1, 3]))
        .with_node(op("y", OpDef::Identity, &["x"]))
}

pub fn load(def: GraphDef) -> Arc<GraphHandle> {
    Arc::new(GraphHandle::from_def(def, &ImportOptions::default()).expect("graph loads"))
}

pub fn model(def: GraphDef) -> Model {
    setup();
    let bytes = def.to_json_string().expect("graph serializes");
    Model::from_graph_bytes(bytes.as_bytes(), &ModelOptions::default()).expect("model opens")
}
