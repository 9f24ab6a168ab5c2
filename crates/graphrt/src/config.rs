//! File-based runtime configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::graph::{GraphFormat, ImportOptions};
use crate::runtime::ModelOptions;
use crate::session::SessionOptions;

/// Everything needed to open a [`Model`](crate::runtime::Model) from disk.
///
/// Relative paths are resolved against the directory containing the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub graph: PathBuf,
    #[serde(default)]
    pub format: GraphFormat,
    #[serde(default)]
    pub import_prefix: Option<String>,
    #[serde(default)]
    pub session: SessionOptions,
    /// Checkpoint prefix restored right after the session is created.
    #[serde(default)]
    pub restore_from: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn new(graph: impl Into<PathBuf>) -> Self {
        Self {
            graph: graph.into(),
            format: GraphFormat::default(),
            import_prefix: None,
            session: SessionOptions::default(),
            restore_from: None,
        }
    }

    pub fn from_json_str(src: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(src).context("failed to parse runtime config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let mut config = RuntimeConfig::from_json_str(&contents)
            .with_context(|| format!("invalid runtime config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.graph = resolve_relative(base, &config.graph);
            config.restore_from = config
                .restore_from
                .map(|prefix| resolve_relative(base, &prefix));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.graph.as_os_str().is_empty(),
            "runtime config must name a graph file"
        );
        if let Some(fraction) = self.session.per_process_gpu_memory_fraction {
            ensure!(
                fraction > 0.0 && fraction <= 1.0,
                "session.per_process_gpu_memory_fraction must be in (0.0, 1.0], got {}",
                fraction
            );
        }
        Ok(())
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            import: ImportOptions {
                format: self.format,
                prefix: self.import_prefix.clone(),
            },
            session: self.session.clone().apply_env_overrides(),
        }
    }
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}
