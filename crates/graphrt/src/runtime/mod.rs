//! Runtime context tying one graph, one session, and its named buffers together.

mod coordinator;
mod registry;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use crate::checkpoint;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::graph::{GraphHandle, ImportOptions, OperationHandle};
use crate::session::{SessionHandle, SessionOptions};
use crate::tensor::{Element, TensorValue, TypedBuffer};

pub use coordinator::ExecutionCoordinator;
pub use registry::NamedEndpointRegistry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOptions {
    pub import: ImportOptions,
    pub session: SessionOptions,
}

/// A loaded graph with a live session and a registry of named buffers.
#[derive(Debug)]
pub struct Model {
    graph: Arc<GraphHandle>,
    session: SessionHandle,
    registry: NamedEndpointRegistry,
}

impl Model {
    /// Opens a graph file with default options and environment overrides applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Model> {
        let options = ModelOptions {
            session: SessionOptions::default().apply_env_overrides(),
            ..ModelOptions::default()
        };
        Model::open_with(path, &options)
    }

    pub fn open_with(path: impl AsRef<Path>, options: &ModelOptions) -> Result<Model> {
        let graph = GraphHandle::load_file(path, &options.import)?;
        Model::from_graph(Arc::new(graph), &options.session)
    }

    pub fn from_graph_bytes(bytes: &[u8], options: &ModelOptions) -> Result<Model> {
        let graph = GraphHandle::load(bytes, &options.import)?;
        Model::from_graph(Arc::new(graph), &options.session)
    }

    pub fn from_graph(graph: Arc<GraphHandle>, options: &SessionOptions) -> Result<Model> {
        let session = SessionHandle::create(Arc::clone(&graph), options)?;
        let registry = NamedEndpointRegistry::new(Arc::clone(&graph));
        Ok(Model {
            graph,
            session,
            registry,
        })
    }

    /// Opens the configured graph and restores the configured checkpoint, if any.
    pub fn from_config(config: &RuntimeConfig) -> anyhow::Result<Model> {
        config.validate()?;
        let mut model = Model::open_with(&config.graph, &config.model_options())
            .with_context(|| format!("failed to open graph {}", config.graph.display()))?;
        if let Some(prefix) = &config.restore_from {
            model
                .restore(prefix)
                .with_context(|| format!("failed to restore checkpoint {}", prefix.display()))?;
        }
        debug!(graph = %config.graph.display(), "opened model from config");
        Ok(model)
    }

    pub fn graph(&self) -> &Arc<GraphHandle> {
        &self.graph
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn registry(&self) -> &NamedEndpointRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NamedEndpointRegistry {
        &mut self.registry
    }

    pub fn operation_names(&self) -> Vec<String> {
        self.graph.list_operation_names()
    }

    pub fn register_tensors<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.registry.register_tensors(names)
    }

    pub fn register_operations<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.registry.register_operations(names)
    }

    pub fn tensor(&self, name: &str) -> Result<&TypedBuffer> {
        self.registry.get(name)
    }

    pub fn tensor_mut(&mut self, name: &str) -> Result<&mut TypedBuffer> {
        self.registry.get_mut(name)
    }

    pub fn operation(&mut self, name: &str) -> Result<OperationHandle> {
        self.registry.register_operation(name).cloned()
    }

    /// Writes `values` into the named buffer, registering it on first use.
    pub fn set_data<T: Element>(&mut self, name: &str, values: &[T]) -> Result<()> {
        self.registry.register_tensor(name)?.set_data(values)
    }

    pub fn get_data<T: Element>(&self, name: &str) -> Result<Vec<T>> {
        self.registry.get(name)?.get_data()
    }

    /// Runs by name; see [`ExecutionCoordinator::run_named`].
    pub fn run(&mut self, inputs: &[&str], outputs: &[&str], ops: &[&str]) -> Result<()> {
        ExecutionCoordinator::run_named(&mut self.session, &mut self.registry, inputs, outputs, ops)
    }

    /// Runs with caller-owned buffers bound to this model's graph.
    pub fn run_buffers(
        &mut self,
        inputs: &[&TypedBuffer],
        outputs: &mut [&mut TypedBuffer],
        ops: &[OperationHandle],
    ) -> Result<()> {
        ExecutionCoordinator::run(&mut self.session, inputs, outputs, ops)
    }

    /// Feeds values by name and returns the fetched outputs that produced data.
    pub fn run_with_feeds(
        &mut self,
        feeds: &BTreeMap<String, TensorValue>,
        outputs: &[&str],
        ops: &[&str],
    ) -> Result<BTreeMap<String, TensorValue>> {
        for (name, value) in feeds {
            self.registry.register_tensor(name)?.set_value(value)?;
        }
        let inputs: Vec<&str> = feeds.keys().map(String::as_str).collect();
        self.run(&inputs, outputs, ops)?;

        let mut fetched = BTreeMap::new();
        for name in outputs {
            let buffer = self.registry.get(name)?;
            if buffer.has_data() {
                fetched.insert(name.to_string(), buffer.get_value()?);
            }
        }
        Ok(fetched)
    }

    /// Saves all initialized variables to `<prefix>.ckpt`.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<PathBuf> {
        checkpoint::save(&self.graph, &self.session, prefix)
    }

    pub fn restore(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        checkpoint::restore(&self.graph, &mut self.session, prefix)
    }

    /// Closes the session; buffers stay readable.
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}
