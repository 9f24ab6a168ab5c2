mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{identity_graph, load, model, op, placeholder, scalar, setup, variable};
use graphrt::{
    Code, DType, ExecutionCoordinator, GraphDef, NodeDef, OpDef, RuntimeError, SessionHandle,
    SessionOptions, TensorValue, TypedBuffer,
};

#[test]
fn identity_resolves_wildcard_batch() {
    setup();
    let graph = load(identity_graph());
    let mut session =
        SessionHandle::create(Arc::clone(&graph), &SessionOptions::default()).unwrap();

    let mut x = TypedBuffer::bind(&graph, "x", &[-1, 3], DType::F32).unwrap();
    let values = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    x.set_data(&values).unwrap();
    assert_eq!(x.shape(), &[2, 3]);

    let mut y = TypedBuffer::new(&graph, "y").unwrap();
    ExecutionCoordinator::run(&mut session, &[&x], &mut [&mut y], &[]).unwrap();

    assert_eq!(y.shape(), &[2, 3]);
    assert_eq!(y.get_data::<f32>().unwrap(), values.to_vec());
    session.close().unwrap();
}

#[test]
fn outputs_follow_submission_order() {
    let def = GraphDef::new()
        .with_node(placeholder("x", DType::I32, &[-1]))
        .with_node(op("a", OpDef::Neg, &["x"]))
        .with_node(op("b", OpDef::Square, &["x"]));
    let mut model = model(def);
    model.set_data("x", &[1i32, -2, 3]).unwrap();

    model.run(&["x"], &["b", "a"], &[]).unwrap();
    assert_eq!(model.get_data::<i32>("a").unwrap(), vec![-1, 2, -3]);
    assert_eq!(model.get_data::<i32>("b").unwrap(), vec![1, 4, 9]);

    let graph = Arc::clone(model.graph());
    let x = model.tensor("x").unwrap().get_data::<i32>().unwrap();
    let mut input = TypedBuffer::new(&graph, "x").unwrap();
    input.set_data(&x).unwrap();
    let mut first = TypedBuffer::new(&graph, "a").unwrap();
    let mut second = TypedBuffer::new(&graph, "b").unwrap();
    model
        .run_buffers(&[&input], &mut [&mut second, &mut first], &[])
        .unwrap();
    assert_eq!(first.get_data::<i32>().unwrap(), vec![-1, 2, -3]);
    assert_eq!(second.get_data::<i32>().unwrap(), vec![1, 4, 9]);
}

#[test]
fn failed_step_leaves_outputs_untouched() {
    let def = GraphDef::new()
        .with_node(placeholder("x", DType::F32, &[-1]))
        .with_node(placeholder("z", DType::F32, &[-1]))
        .with_node(op("y", OpDef::Identity, &["x"]))
        .with_node(op("w", OpDef::Add, &["x", "z"]));
    let mut model = model(def);

    model.set_data("x", &[1.0f32, 2.0]).unwrap();
    model.run(&["x"], &["y"], &[]).unwrap();
    assert_eq!(model.get_data::<f32>("y").unwrap(), vec![1.0, 2.0]);

    model.set_data("x", &[5.0f32, 6.0]).unwrap();
    let err = model.run(&["x"], &["y", "w"], &[]).unwrap_err();
    assert_eq!(err.code(), Some(Code::InvalidArgument));
    assert!(err.to_string().contains("placeholder 'z' must be fed"));
    assert_eq!(model.get_data::<f32>("y").unwrap(), vec![1.0, 2.0]);
    assert!(!model.tensor("w").unwrap().has_data());
}

#[test]
fn inputs_without_data_are_rejected_before_execution() {
    let mut model = model(identity_graph());
    model.register_tensors(&["x"]).unwrap();
    assert!(matches!(
        model.run(&["x"], &["y"], &[]),
        Err(RuntimeError::MissingInputData(name)) if name == "x"
    ));
    assert!(matches!(
        model.run(&["never_registered"], &["y"], &[]),
        Err(RuntimeError::MissingInputData(_))
    ));
}

#[test]
fn binding_f32_data_to_f64_endpoint_fails() {
    setup();
    let def = GraphDef::new().with_node(placeholder("x", DType::F64, &[3]));
    let graph = load(def);
    assert!(matches!(
        TypedBuffer::bind_as::<f32>(&graph, "x", &[3]),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    let mut buffer = TypedBuffer::bind_as::<f64>(&graph, "x", &[3]).unwrap();
    assert!(matches!(
        buffer.set_data(&[1.0f32, 2.0, 3.0]),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    assert!(!buffer.has_data());
}

#[test]
fn same_count_results_replace_but_inputs_reuse() {
    let mut model = model(identity_graph());
    model.set_data("x", &[0.0f32; 6]).unwrap();
    let before = model.tensor("x").unwrap().data_ptr();
    model.set_data("x", &[1.0f32; 6]).unwrap();
    assert_eq!(model.tensor("x").unwrap().data_ptr(), before);

    model.run(&["x"], &["y"], &[]).unwrap();
    assert_eq!(model.tensor("y").unwrap().shape(), &[2, 3]);

    model.set_data("x", &[2.0f32; 12]).unwrap();
    assert_eq!(model.tensor("x").unwrap().shape(), &[4, 3]);
    model.run(&["x"], &["y"], &[]).unwrap();
    assert_eq!(model.tensor("y").unwrap().shape(), &[4, 3]);
    assert_eq!(model.get_data::<f32>("y").unwrap(), vec![2.0; 12]);
}

#[test]
fn control_targets_run_and_clear_fetched_buffers() {
    let def = GraphDef::new()
        .with_node(variable("counter", DType::I64, &[]))
        .with_node(scalar("one", vec![1i64]))
        .with_node(op("init", OpDef::Assign, &["counter", "one"]))
        .with_node(op("bump", OpDef::AssignAdd, &["counter", "one"]))
        .with_node(NodeDef::new("step", OpDef::NoOp).with_control_inputs(["bump"]));
    let mut model = model(def);

    model.run(&[], &[], &["init"]).unwrap();
    model.run(&[], &["step"], &["step"]).unwrap();
    model.run(&[], &[], &["step"]).unwrap();
    assert!(!model.tensor("step").unwrap().has_data());

    model.run(&[], &["counter"], &[]).unwrap();
    assert_eq!(model.get_data::<i64>("counter").unwrap(), vec![3]);
}

#[test]
fn uninitialized_variables_fail_with_precondition() {
    let def = GraphDef::new().with_node(variable("w", DType::F32, &[2]));
    let mut model = model(def);
    let err = model.run(&[], &["w"], &[]).unwrap_err();
    assert_eq!(err.code(), Some(Code::FailedPrecondition));
}

#[test]
fn dictionary_feeds_return_fetched_values() {
    let def = GraphDef::new()
        .with_node(placeholder("a", DType::F64, &[-1]))
        .with_node(placeholder("b", DType::F64, &[-1]))
        .with_node(op("sum", OpDef::Add, &["a", "b"]))
        .with_node(op("total", OpDef::ReduceSum { axes: None }, &["sum"]))
        .with_node(NodeDef::new("noop", OpDef::NoOp));
    let mut model = model(def);

    let mut feeds = BTreeMap::new();
    feeds.insert("a".to_string(), TensorValue::from(vec![1.0f64, 2.0]));
    feeds.insert("b".to_string(), TensorValue::from(vec![10.0f64, 20.0]));
    let fetched = model
        .run_with_feeds(&feeds, &["sum", "total", "noop"], &[])
        .unwrap();

    assert_eq!(fetched["sum"], TensorValue::from(vec![11.0f64, 22.0]));
    assert_eq!(fetched["total"], TensorValue::from(vec![33.0f64]));
    assert!(!fetched.contains_key("noop"));
    assert_eq!(model.tensor("total").unwrap().shape(), &[] as &[usize]);
}

#[test]
fn closed_sessions_refuse_work() {
    let mut model = model(identity_graph());
    model.set_data("x", &[1.0f32, 2.0, 3.0]).unwrap();
    model.close().unwrap();

    let err = model.run(&["x"], &["y"], &[]).unwrap_err();
    assert_eq!(err.code(), Some(Code::FailedPrecondition));
    assert!(matches!(model.close(), Err(RuntimeError::SessionCloseFailed(_))));
    assert_eq!(model.get_data::<f32>("x").unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn unknown_backend_fails_session_creation() {
    setup();
    let graph = load(identity_graph());
    let options = SessionOptions::default().with_backend("does-not-exist");
    assert!(matches!(
        SessionHandle::create(graph, &options),
        Err(RuntimeError::SessionCreateFailed(_))
    ));
}

#[test]
fn invalid_memory_fraction_is_refused_by_backend() {
    setup();
    let graph = load(identity_graph());
    let options = SessionOptions::default()
        .with_threads(2, 2)
        .with_memory_fraction(0.0);
    assert!(matches!(
        SessionHandle::create(graph, &options),
        Err(RuntimeError::SessionCreateFailed(_))
    ));
}
