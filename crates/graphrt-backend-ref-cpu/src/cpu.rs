//! Reference interpreter: evaluates a graph node by node on the host.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use graphrt::backend::{
    BackendError, BackendResult, BackendSession, ExecutionBackend, VariableSnapshot,
};
use graphrt::graph::{Endpoint, GraphHandle, Node, OpDef, OperationHandle, OutputSignature};
use graphrt::session::SessionOptions;
use graphrt::tensor::RawTensor;
use tracing::{debug, trace};

use crate::kernels::{self, BinaryKind, HostTensor, ReduceKind, UnaryKind};

/// Stateless factory for [`CpuSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuReferenceBackend;

impl CpuReferenceBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionBackend for CpuReferenceBackend {
    fn backend_name(&self) -> &str {
        "cpu-reference"
    }

    fn open_session(
        &self,
        graph: Arc<GraphHandle>,
        options: &SessionOptions,
    ) -> BackendResult<Box<dyn BackendSession>> {
        if let Some(fraction) = options.per_process_gpu_memory_fraction {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(BackendError::invalid_argument(format!(
                    "per_process_gpu_memory_fraction must be in (0, 1], got {fraction}"
                )));
            }
        }
        debug!(
            graph = %graph.id(),
            intra_op_threads = options.intra_op_parallelism_threads,
            inter_op_threads = options.inter_op_parallelism_threads,
            "opened cpu reference session"
        );
        Ok(Box::new(CpuSession::new(graph)))
    }
}

/// Session state: the graph plus the current value of every initialized variable.
#[derive(Debug)]
pub struct CpuSession {
    graph: Arc<GraphHandle>,
    variables: HashMap<usize, HostTensor>,
    closed: bool,
}

impl CpuSession {
    pub fn new(graph: Arc<GraphHandle>) -> Self {
        Self {
            graph,
            variables: HashMap::new(),
            closed: false,
        }
    }

    /// Nodes that must be evaluated to produce `roots`. Traversal stops at fed nodes and does not
    /// read the variable an assignment writes to.
    fn needed_nodes(&self, roots: &[usize], fed: &HashMap<usize, HostTensor>) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = roots.to_vec();
        while let Some(index) = stack.pop() {
            if !seen.insert(index) || fed.contains_key(&index) {
                continue;
            }
            let node = &self.graph.nodes()[index];
            let skip = usize::from(node.op().is_assignment());
            stack.extend(node.inputs().iter().skip(skip).copied());
            stack.extend(node.control_inputs().iter().copied());
        }
        let mut order: Vec<usize> = seen.into_iter().collect();
        order.sort_unstable();
        order
    }

    fn evaluate(
        &mut self,
        index: usize,
        values: &[Option<HostTensor>],
    ) -> BackendResult<Option<HostTensor>> {
        let graph = Arc::clone(&self.graph);
        let node = &graph.nodes()[index];
        let input = |slot: usize| -> BackendResult<&HostTensor> {
            node.inputs()
                .get(slot)
                .and_then(|&idx| values[idx].as_ref())
                .ok_or_else(|| {
                    BackendError::internal(format!(
                        "input {slot} of '{}' was not evaluated",
                        node.name()
                    ))
                })
        };

        let value = match node.op() {
            OpDef::Placeholder { .. } => {
                return Err(BackendError::invalid_argument(format!(
                    "placeholder '{}' must be fed",
                    node.name()
                )))
            }
            OpDef::Const { literal } => {
                HostTensor::new(literal.shape.clone(), literal.value.clone())
            }
            OpDef::Variable { .. } => self.read_variable(index, node)?.clone(),
            OpDef::Identity => input(0)?.clone(),
            OpDef::Add => kernels::binary(BinaryKind::Add, input(0)?, input(1)?)?,
            OpDef::Sub => kernels::binary(BinaryKind::Sub, input(0)?, input(1)?)?,
            OpDef::Mul => kernels::binary(BinaryKind::Mul, input(0)?, input(1)?)?,
            OpDef::Div => kernels::binary(BinaryKind::Div, input(0)?, input(1)?)?,
            OpDef::Neg => kernels::unary(UnaryKind::Neg, input(0)?)?,
            OpDef::Square => kernels::unary(UnaryKind::Square, input(0)?)?,
            OpDef::MatMul {
                transpose_a,
                transpose_b,
            } => kernels::matmul(input(0)?, input(1)?, *transpose_a, *transpose_b)?,
            OpDef::ReduceSum { axes } => {
                kernels::reduce(ReduceKind::Sum, input(0)?, axes.as_deref())?
            }
            OpDef::ReduceMean { axes } => {
                kernels::reduce(ReduceKind::Mean, input(0)?, axes.as_deref())?
            }
            OpDef::Cast { dtype } => kernels::cast(input(0)?, *dtype),
            OpDef::Assign | OpDef::AssignAdd | OpDef::AssignSub => {
                let target = node.inputs()[0];
                let update = input(1)?;
                let next = match node.op() {
                    OpDef::Assign => update.clone(),
                    op => {
                        let kind = if matches!(op, OpDef::AssignAdd) {
                            BinaryKind::Add
                        } else {
                            BinaryKind::Sub
                        };
                        let current = self.read_variable(target, &graph.nodes()[target])?;
                        let next = kernels::binary(kind, current, update)?;
                        if next.dims != current.dims {
                            return Err(BackendError::invalid_argument(format!(
                                "'{}' would change the shape of variable '{}' from {:?} to {:?}",
                                node.name(),
                                graph.nodes()[target].name(),
                                current.dims,
                                next.dims
                            )));
                        }
                        next
                    }
                };
                self.check_variable_value(target, &next)?;
                self.variables.insert(target, next.clone());
                next
            }
            OpDef::NoOp => return Ok(None),
        };
        Ok(Some(value))
    }

    fn read_variable(&self, index: usize, node: &Node) -> BackendResult<&HostTensor> {
        self.variables.get(&index).ok_or_else(|| {
            BackendError::failed_precondition(format!(
                "variable '{}' is uninitialized",
                node.name()
            ))
        })
    }

    fn check_variable_value(&self, index: usize, value: &HostTensor) -> BackendResult<()> {
        let node = &self.graph.nodes()[index];
        let OpDef::Variable { dtype, shape } = node.op() else {
            return Err(BackendError::invalid_argument(format!(
                "'{}' is not a variable",
                node.name()
            )));
        };
        if value.dtype() != *dtype || !shape.accepts(&value.dims) {
            return Err(BackendError::invalid_argument(format!(
                "variable '{}' holds {} {}, got {} {:?}",
                node.name(),
                dtype,
                shape,
                value.dtype(),
                value.dims
            )));
        }
        Ok(())
    }

    fn check_open(&self) -> BackendResult<()> {
        if self.closed {
            Err(BackendError::failed_precondition("session is closed"))
        } else {
            Ok(())
        }
    }
}

impl BackendSession for CpuSession {
    fn run(
        &mut self,
        inputs: &[Endpoint],
        input_tensors: &[&RawTensor],
        outputs: &[Endpoint],
        targets: &[OperationHandle],
    ) -> BackendResult<Vec<Option<RawTensor>>> {
        self.check_open()?;

        let mut fed = HashMap::with_capacity(inputs.len());
        for (endpoint, tensor) in inputs.iter().zip(input_tensors) {
            let node = &self.graph.nodes()[endpoint.node_index()];
            let spec = node.output().data().ok_or_else(|| {
                BackendError::invalid_argument(format!(
                    "'{}' produces no data and cannot be fed",
                    node.name()
                ))
            })?;
            if tensor.dtype() != spec.dtype || !spec.shape.accepts(tensor.dims()) {
                return Err(BackendError::invalid_argument(format!(
                    "feed for '{}' is {} {:?}, expected {} {}",
                    node.name(),
                    tensor.dtype(),
                    tensor.dims(),
                    spec.dtype,
                    spec.shape
                )));
            }
            if fed
                .insert(endpoint.node_index(), HostTensor::from_raw(tensor))
                .is_some()
            {
                return Err(BackendError::invalid_argument(format!(
                    "'{}' is fed more than once",
                    node.name()
                )));
            }
        }

        let roots: Vec<usize> = outputs
            .iter()
            .map(Endpoint::node_index)
            .chain(targets.iter().map(OperationHandle::node_index))
            .collect();
        let order = self.needed_nodes(&roots, &fed);

        let mut values: Vec<Option<HostTensor>> = vec![None; self.graph.len()];
        for (index, value) in fed {
            values[index] = Some(value);
        }
        for index in order {
            if values[index].is_some() {
                continue;
            }
            let value = self.evaluate(index, &values)?;
            trace!(node = %self.graph.nodes()[index].name(), "evaluated node");
            values[index] = value;
        }

        outputs
            .iter()
            .map(|endpoint| match self.graph.nodes()[endpoint.node_index()].output() {
                OutputSignature::Control => Ok(None),
                OutputSignature::Data(_) => values[endpoint.node_index()]
                    .as_ref()
                    .map(HostTensor::to_raw)
                    .transpose(),
            })
            .collect()
    }

    fn export_variables(&self) -> BackendResult<VariableSnapshot> {
        self.check_open()?;
        let mut indices: Vec<usize> = self.variables.keys().copied().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|index| {
                let name = self.graph.nodes()[index].name().to_string();
                Ok((name, self.variables[&index].to_raw()?))
            })
            .collect()
    }

    fn import_variables(&mut self, variables: VariableSnapshot) -> BackendResult<()> {
        self.check_open()?;
        let mut staged = Vec::with_capacity(variables.len());
        for (name, tensor) in &variables {
            let (endpoint, _) = self.graph.lookup_endpoint(name).map_err(|err| {
                BackendError::new(graphrt::Code::NotFound, err.to_string())
            })?;
            let value = HostTensor::from_raw(tensor);
            self.check_variable_value(endpoint.node_index(), &value)?;
            staged.push((endpoint.node_index(), value));
        }
        self.variables.extend(staged);
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        self.check_open()?;
        self.closed = true;
        self.variables.clear();
        debug!(graph = %self.graph.id(), "closed cpu reference session");
        Ok(())
    }
}
