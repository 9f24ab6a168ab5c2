//! Name-keyed ownership of typed buffers and operation handles for one graph.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::graph::{GraphHandle, OperationHandle};
use crate::tensor::TypedBuffer;

/// Registration is idempotent: registering a name twice returns the existing entry untouched.
#[derive(Debug)]
pub struct NamedEndpointRegistry {
    graph: Arc<GraphHandle>,
    tensors: BTreeMap<String, TypedBuffer>,
    operations: BTreeMap<String, OperationHandle>,
}

impl NamedEndpointRegistry {
    pub fn new(graph: Arc<GraphHandle>) -> Self {
        Self {
            graph,
            tensors: BTreeMap::new(),
            operations: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &Arc<GraphHandle> {
        &self.graph
    }

    pub fn register_tensor(&mut self, name: &str) -> Result<&mut TypedBuffer> {
        match self.tensors.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let buffer = TypedBuffer::new(&self.graph, name)?;
                Ok(entry.insert(buffer))
            }
        }
    }

    pub fn register_tensors<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            self.register_tensor(name.as_ref())?;
        }
        Ok(())
    }

    pub fn register_operation(&mut self, name: &str) -> Result<&OperationHandle> {
        match self.operations.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let operation = self.graph.operation(name)?;
                Ok(&*entry.insert(operation))
            }
        }
    }

    pub fn register_operations<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            self.register_operation(name.as_ref())?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&TypedBuffer> {
        self.tensors
            .get(name)
            .ok_or_else(|| RuntimeError::NotRegistered(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut TypedBuffer> {
        self.tensors
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotRegistered(name.to_string()))
    }

    pub fn operation(&self, name: &str) -> Result<&OperationHandle> {
        self.operations
            .get(name)
            .ok_or_else(|| RuntimeError::NotRegistered(name.to_string()))
    }

    pub fn contains_tensor(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn contains_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Registered tensor names in sorted order.
    pub fn tensor_names(&self) -> Vec<&str> {
        self.tensors.keys().map(String::as_str).collect()
    }
}
