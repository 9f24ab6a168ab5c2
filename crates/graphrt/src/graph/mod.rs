//! Immutable graph handles and the endpoint/operation references resolved against them.

mod def;
mod import;
mod infer;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::tensor::{DType, DeclaredShape};

pub use def::{GraphDef, GraphDefError, NodeDef, OpDef, TensorLiteral, GRAPHDEF_VERSION};
pub use import::{GraphFormat, ImportOptions};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a loaded graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    fn next() -> Self {
        GraphId(NEXT_GRAPH_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// Declared element type and shape of an operation's primary output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointSpec {
    pub dtype: DType,
    pub shape: DeclaredShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputSignature {
    Data(EndpointSpec),
    /// The operation only has side effects or ordering meaning.
    Control,
}

impl OutputSignature {
    pub fn data(&self) -> Option<&EndpointSpec> {
        match self {
            OutputSignature::Data(spec) => Some(spec),
            OutputSignature::Control => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    op: OpDef,
    inputs: Vec<usize>,
    control_inputs: Vec<usize>,
    output: OutputSignature,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &OpDef {
        &self.op
    }

    /// Data inputs as node indices, all strictly smaller than this node's index.
    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    pub fn control_inputs(&self) -> &[usize] {
        &self.control_inputs
    }

    pub fn output(&self) -> &OutputSignature {
        &self.output
    }
}

/// Reference to output 0 of a named operation in a specific graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    graph: GraphId,
    node: usize,
    index: usize,
    name: Arc<str>,
}

impl Endpoint {
    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    pub fn node_index(&self) -> usize {
        self.node
    }

    pub fn output_index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.index)
    }
}

/// Reference to an operation executed for its side effects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    graph: GraphId,
    node: usize,
    name: Arc<str>,
}

impl OperationHandle {
    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    pub fn node_index(&self) -> usize {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Loaded computation graph. Never mutated after construction.
#[derive(Debug)]
pub struct GraphHandle {
    id: GraphId,
    version: String,
    nodes: Vec<Node>,
    by_name: HashMap<String, usize>,
}

impl GraphHandle {
    /// Decodes and validates a serialized graph definition.
    pub fn load(bytes: &[u8], options: &ImportOptions) -> Result<GraphHandle> {
        if bytes.is_empty() {
            return Err(RuntimeError::GraphLoadFailed(
                "graph definition is empty".to_string(),
            ));
        }
        let def = options
            .format
            .decode(bytes)
            .map_err(|err| RuntimeError::GraphLoadFailed(err.to_string()))?;
        GraphHandle::from_def(def, options)
    }

    pub fn load_file(path: impl AsRef<Path>, options: &ImportOptions) -> Result<GraphHandle> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            RuntimeError::GraphLoadFailed(format!("failed to read {}: {err}", path.display()))
        })?;
        GraphHandle::load(&bytes, options)
    }

    /// Validates an in-memory definition. Inputs must name earlier-declared nodes.
    pub fn from_def(def: GraphDef, options: &ImportOptions) -> Result<GraphHandle> {
        let mut nodes: Vec<Node> = Vec::with_capacity(def.nodes.len());
        let mut by_name = HashMap::with_capacity(def.nodes.len());

        for node_def in def.nodes {
            let name = options.qualify(&node_def.name);
            if by_name.contains_key(&name) {
                return Err(load_error(&name, "duplicate node name"));
            }

            let inputs = resolve_refs(&by_name, options, &name, &node_def.inputs)?;
            let control_inputs = resolve_refs(&by_name, options, &name, &node_def.control_inputs)?;

            let operands = inputs
                .iter()
                .map(|&idx| {
                    let input = &nodes[idx];
                    infer::Operand {
                        name: &input.name,
                        op: &input.op,
                        output: &input.output,
                    }
                })
                .collect::<Vec<_>>();
            let output = infer::infer_output(&node_def.op, &operands)
                .map_err(|reason| load_error(&name, &reason))?;

            by_name.insert(name.clone(), nodes.len());
            nodes.push(Node {
                name,
                op: node_def.op,
                inputs,
                control_inputs,
                output,
            });
        }

        let graph = GraphHandle {
            id: GraphId::next(),
            version: def.version,
            nodes,
            by_name,
        };
        debug!(graph = %graph.id, nodes = graph.nodes.len(), "loaded graph");
        Ok(graph)
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Operation names in declaration order.
    pub fn list_operation_names(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.name.clone()).collect()
    }

    /// Resolves the primary output of `name` together with its signature, control ops included.
    pub fn endpoint(&self, name: &str) -> Result<(Endpoint, &OutputSignature)> {
        let node = self.find(name)?;
        let endpoint = Endpoint {
            graph: self.id,
            node,
            index: 0,
            name: Arc::from(self.nodes[node].name.as_str()),
        };
        Ok((endpoint, &self.nodes[node].output))
    }

    /// Declared dtype and shape (wildcards preserved) of a data-producing operation.
    pub fn lookup_endpoint(&self, name: &str) -> Result<(Endpoint, EndpointSpec)> {
        let (endpoint, signature) = self.endpoint(name)?;
        match signature {
            OutputSignature::Data(spec) => Ok((endpoint, spec.clone())),
            OutputSignature::Control => Err(RuntimeError::EndpointNotFound {
                name: name.to_string(),
                reason: "operation produces no data output".to_string(),
            }),
        }
    }

    pub fn operation(&self, name: &str) -> Result<OperationHandle> {
        let node = self.find(name)?;
        Ok(OperationHandle {
            graph: self.id,
            node,
            name: Arc::from(self.nodes[node].name.as_str()),
        })
    }

    pub fn owns_endpoint(&self, endpoint: &Endpoint) -> bool {
        endpoint.graph == self.id && endpoint.node < self.nodes.len() && endpoint.index == 0
    }

    pub fn owns_operation(&self, operation: &OperationHandle) -> bool {
        operation.graph == self.id && operation.node < self.nodes.len()
    }

    fn find(&self, name: &str) -> Result<usize> {
        let bare = strip_output_suffix(name).map_err(|reason| RuntimeError::EndpointNotFound {
            name: name.to_string(),
            reason,
        })?;
        self.by_name
            .get(bare)
            .copied()
            .ok_or_else(|| RuntimeError::EndpointNotFound {
                name: name.to_string(),
                reason: "no such operation in graph".to_string(),
            })
    }
}

fn load_error(node: &str, reason: &str) -> RuntimeError {
    RuntimeError::GraphLoadFailed(format!("node '{node}': {reason}"))
}

/// Accepts `name` or `name:0`; other output indices do not exist.
fn strip_output_suffix(name: &str) -> std::result::Result<&str, String> {
    match name.rsplit_once(':') {
        Some((base, "0")) => Ok(base),
        Some((_, index)) if index.parse::<usize>().is_ok() => {
            Err(format!("output index {index} does not exist"))
        }
        _ => Ok(name),
    }
}

fn resolve_refs(
    by_name: &HashMap<String, usize>,
    options: &ImportOptions,
    node: &str,
    refs: &[String],
) -> Result<Vec<usize>> {
    refs.iter()
        .map(|reference| {
            let bare = strip_output_suffix(reference).map_err(|reason| load_error(node, &reason))?;
            let qualified = options.qualify(bare);
            by_name.get(&qualified).copied().ok_or_else(|| {
                load_error(
                    node,
                    &format!("input '{reference}' is unknown or declared later"),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder(name: &str, dims: &[i64]) -> NodeDef {
        NodeDef::new(
            name,
            OpDef::Placeholder {
                dtype: DType::F32,
                shape: DeclaredShape::from_signed(dims),
            },
        )
    }

    fn identity_graph() -> GraphDef {
        GraphDef::new()
            .with_node(placeholder("x", &[-1, 3]))
            .with_node(NodeDef::new("y", OpDef::Identity).with_inputs(["x"]))
            .with_node(NodeDef::new("noop", OpDef::NoOp).with_control_inputs(["y"]))
    }

    #[test]
    fn lookup_preserves_wildcards() {
        let graph = GraphHandle::from_def(identity_graph(), &ImportOptions::default()).unwrap();
        let (endpoint, spec) = graph.lookup_endpoint("y").unwrap();
        assert_eq!(endpoint.name(), "y");
        assert_eq!(spec.dtype, DType::F32);
        assert_eq!(spec.shape, DeclaredShape::from_signed(&[-1, 3]));
        assert!(graph.owns_endpoint(&endpoint));
        assert_eq!(graph.lookup_endpoint("y:0").unwrap().0, endpoint);
    }

    #[test]
    fn unknown_and_control_endpoints_are_not_found() {
        let graph = GraphHandle::from_def(identity_graph(), &ImportOptions::default()).unwrap();
        assert!(matches!(
            graph.lookup_endpoint("missing"),
            Err(RuntimeError::EndpointNotFound { .. })
        ));
        assert!(matches!(
            graph.lookup_endpoint("noop"),
            Err(RuntimeError::EndpointNotFound { .. })
        ));
        assert!(matches!(
            graph.lookup_endpoint("y:1"),
            Err(RuntimeError::EndpointNotFound { .. })
        ));
        assert_eq!(graph.operation("noop").unwrap().node_index(), 2);
    }

    #[test]
    fn operation_names_follow_declaration_order() {
        let graph = GraphHandle::from_def(identity_graph(), &ImportOptions::default()).unwrap();
        assert_eq!(graph.list_operation_names(), vec!["x", "y", "noop"]);
    }

    #[test]
    fn forward_references_are_rejected() {
        let def = GraphDef::new()
            .with_node(NodeDef::new("y", OpDef::Identity).with_inputs(["x"]))
            .with_node(placeholder("x", &[2]));
        let err = GraphHandle::from_def(def, &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::GraphLoadFailed(_)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let def = GraphDef::new()
            .with_node(placeholder("x", &[2]))
            .with_node(placeholder("x", &[3]));
        let err = GraphHandle::from_def(def, &ImportOptions::default()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn empty_and_malformed_bytes_fail_to_load() {
        let options = ImportOptions::default();
        assert!(matches!(
            GraphHandle::load(&[], &options),
            Err(RuntimeError::GraphLoadFailed(_))
        ));
        assert!(matches!(
            GraphHandle::load(b"{not json", &options),
            Err(RuntimeError::GraphLoadFailed(_))
        ));
        assert!(matches!(
            GraphHandle::load(&[0xff, 0x01], &options),
            Err(RuntimeError::GraphLoadFailed(_))
        ));
    }

    #[test]
    fn overflowing_shapes_fail_to_load() {
        let options = ImportOptions::default();
        let huge_const = br#"{"nodes": [{"name": "c", "op": {"const": {"literal": {
            "shape": [9223372036854775807, 4], "value": {"f32": [1.0]}
        }}}}]}"#;
        assert!(matches!(
            GraphHandle::load(huge_const, &options),
            Err(RuntimeError::GraphLoadFailed(_))
        ));

        let huge_placeholder = br#"{"nodes": [{"name": "x", "op": {"placeholder": {
            "dtype": "f32", "shape": [4294967296, 4294967296, -1]
        }}}]}"#;
        assert!(matches!(
            GraphHandle::load(huge_placeholder, &options),
            Err(RuntimeError::GraphLoadFailed(_))
        ));
    }

    #[test]
    fn prefix_applies_to_names_and_inputs() {
        let options = ImportOptions::default().with_prefix("net");
        let bytes = identity_graph().to_json_string().unwrap();
        let graph = GraphHandle::load(bytes.as_bytes(), &options).unwrap();
        assert!(graph.lookup_endpoint("net/y").is_ok());
        assert!(graph.lookup_endpoint("y").is_err());
        assert_eq!(graph.nodes()[1].inputs(), &[0]);
    }

    #[test]
    fn bincode_and_json_load_the_same_graph() {
        let def = identity_graph();
        let from_json = GraphHandle::load(
            def.to_json_string().unwrap().as_bytes(),
            &ImportOptions::default(),
        )
        .unwrap();
        let from_bincode = GraphHandle::load(
            &def.to_bincode_bytes().unwrap(),
            &ImportOptions::default().with_format(GraphFormat::Bincode),
        )
        .unwrap();
        assert_ne!(from_json.id(), from_bincode.id());
        assert_eq!(
            from_json.list_operation_names(),
            from_bincode.list_operation_names()
        );
    }
}
