mod common;

use common::{load, model, op, placeholder};
use graphrt::{DType, Element, GraphDef, OpDef, TypedBuffer};
use half::{bf16, f16};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn identity_of(dtype: DType) -> GraphDef {
    GraphDef::new()
        .with_node(placeholder("x", dtype, &[2, -1]))
        .with_node(op("y", OpDef::Identity, &["x"]))
}

fn round_trip<T: Element + PartialEq + std::fmt::Debug>(values: Vec<T>) {
    let mut model = model(identity_of(T::DTYPE));
    model.set_data("x", &values).unwrap();
    model.run(&["x"], &["y"], &[]).unwrap();

    let output = model.tensor("y").unwrap();
    assert_eq!(output.element_type(), Some(T::DTYPE));
    assert_eq!(output.shape(), vec![2, values.len() / 2]);
    assert_eq!(model.get_data::<T>("y").unwrap(), values);
}

#[test]
fn every_element_type_survives_identity() {
    round_trip(vec![1.5f32, -2.0, 0.0, 8.25]);
    round_trip(vec![1.5f64, -2.0, 1e300, f64::MIN_POSITIVE]);
    round_trip(vec![f16::from_f32(0.5), f16::from_f32(-3.0)]);
    round_trip(vec![bf16::from_f32(0.5), bf16::from_f32(-3.0)]);
    round_trip(vec![i8::MIN, i8::MAX]);
    round_trip(vec![i16::MIN, 0, 7, i16::MAX]);
    round_trip(vec![i32::MIN, i32::MAX]);
    round_trip(vec![i64::MIN, -1, 1, i64::MAX]);
    round_trip(vec![0u8, u8::MAX]);
    round_trip(vec![0u16, u16::MAX]);
    round_trip(vec![0u32, u32::MAX]);
    round_trip(vec![0u64, 1, 2, u64::MAX]);
    round_trip(vec![true, false, false, true]);
}

#[test]
fn seeded_random_batches_round_trip() {
    let mut rng = StdRng::seed_from_u64(7);
    for rows in [1usize, 3, 16] {
        let values: Vec<f32> = (0..rows * 2).map(|_| rng.gen_range(-10.0..10.0)).collect();
        round_trip(values);
    }
}

#[test]
fn empty_batch_resolves_to_zero_rows() {
    let graph = load(
        GraphDef::new()
            .with_node(placeholder("x", DType::I32, &[-1, 4]))
            .with_node(op("y", OpDef::Identity, &["x"])),
    );
    let mut buffer = TypedBuffer::new(&graph, "x").unwrap();
    buffer.set_data::<i32>(&[]).unwrap();
    assert_eq!(buffer.shape(), vec![0, 4]);
    assert!(buffer.get_data::<i32>().unwrap().is_empty());
}
