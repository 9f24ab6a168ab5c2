//! Marshals buffers into one positional execution call and adopts the results.

use crate::error::{Result, RuntimeError};
use crate::graph::{Endpoint, OperationHandle};
use crate::session::SessionHandle;
use crate::tensor::{RawTensor, TypedBuffer};

use super::registry::NamedEndpointRegistry;

/// Stateless driver for one execution step.
///
/// Results are adopted only after the engine call succeeded and every result was checked against
/// its buffer, so a failed step never leaves outputs partially updated.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionCoordinator;

impl ExecutionCoordinator {
    pub fn run(
        session: &mut SessionHandle,
        inputs: &[&TypedBuffer],
        outputs: &mut [&mut TypedBuffer],
        ops: &[OperationHandle],
    ) -> Result<()> {
        let (input_endpoints, input_tensors) = gather_inputs(inputs.iter().copied())?;
        let output_endpoints: Vec<Endpoint> =
            outputs.iter().map(|buffer| buffer.endpoint().clone()).collect();

        let results = session.execute(&input_endpoints, &input_tensors, &output_endpoints, ops)?;

        for (buffer, result) in outputs.iter().zip(&results) {
            buffer.check_result(result.as_ref())?;
        }
        for (buffer, result) in outputs.iter_mut().zip(results) {
            buffer.adopt_result(result);
        }
        Ok(())
    }

    /// Runs by name. Outputs and operations are registered on demand; inputs must already hold
    /// data.
    pub fn run_named(
        session: &mut SessionHandle,
        registry: &mut NamedEndpointRegistry,
        inputs: &[&str],
        outputs: &[&str],
        ops: &[&str],
    ) -> Result<()> {
        for name in outputs {
            registry.register_tensor(name)?;
        }
        let mut operations = Vec::with_capacity(ops.len());
        for name in ops {
            operations.push(registry.register_operation(name)?.clone());
        }

        let results = {
            let buffers = inputs
                .iter()
                .map(|name| {
                    registry
                        .get(name)
                        .map_err(|_| RuntimeError::MissingInputData(name.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            let (input_endpoints, input_tensors) = gather_inputs(buffers.into_iter())?;
            let output_endpoints = outputs
                .iter()
                .map(|name| registry.get(name).map(|buffer| buffer.endpoint().clone()))
                .collect::<Result<Vec<_>>>()?;
            session.execute(&input_endpoints, &input_tensors, &output_endpoints, &operations)?
        };

        for (name, result) in outputs.iter().zip(&results) {
            registry.get(name)?.check_result(result.as_ref())?;
        }
        for (name, result) in outputs.iter().zip(results) {
            registry.get_mut(name)?.adopt_result(result);
        }
        Ok(())
    }
}

fn gather_inputs<'a>(
    buffers: impl Iterator<Item = &'a TypedBuffer>,
) -> Result<(Vec<Endpoint>, Vec<&'a RawTensor>)> {
    let mut endpoints = Vec::new();
    let mut tensors = Vec::new();
    for buffer in buffers {
        let tensor = buffer
            .raw()
            .ok_or_else(|| RuntimeError::MissingInputData(buffer.name().to_string()))?;
        endpoints.push(buffer.endpoint().clone());
        tensors.push(tensor);
    }
    Ok((endpoints, tensors))
}
