use serde::{Deserialize, Serialize};

use crate::env;

pub const DEFAULT_BACKEND: &str = "cpu";

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

/// Engine configuration passed through to the backend when a session is created.
///
/// Thread counts of zero leave the choice to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub intra_op_parallelism_threads: u8,
    #[serde(default)]
    pub inter_op_parallelism_threads: u8,
    #[serde(default)]
    pub per_process_gpu_memory_fraction: Option<f64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            intra_op_parallelism_threads: 0,
            inter_op_parallelism_threads: 0,
            per_process_gpu_memory_fraction: None,
        }
    }
}

impl SessionOptions {
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_threads(mut self, intra_op: u8, inter_op: u8) -> Self {
        self.intra_op_parallelism_threads = intra_op;
        self.inter_op_parallelism_threads = inter_op;
        self
    }

    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.per_process_gpu_memory_fraction = Some(fraction);
        self
    }

    /// Applies `GRAPHRT_BACKEND`, `GRAPHRT_INTRA_OP_THREADS` and `GRAPHRT_INTER_OP_THREADS`.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(backend) = env::backend_override() {
            self.backend = backend.to_string();
        }
        if let Some(threads) = env::intra_op_threads_override() {
            self.intra_op_parallelism_threads = threads;
        }
        if let Some(threads) = env::inter_op_threads_override() {
            self.inter_op_parallelism_threads = threads;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let options: SessionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, SessionOptions::default());
        assert_eq!(options.backend, DEFAULT_BACKEND);
    }

    #[test]
    fn builders_set_fields() {
        let options = SessionOptions::default()
            .with_threads(2, 1)
            .with_memory_fraction(0.5)
            .with_backend("cpu-reference");
        assert_eq!(options.intra_op_parallelism_threads, 2);
        assert_eq!(options.inter_op_parallelism_threads, 1);
        assert_eq!(options.per_process_gpu_memory_fraction, Some(0.5));
        assert_eq!(options.backend, "cpu-reference");
    }
}
