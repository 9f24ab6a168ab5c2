//! Runtime backend registry for dynamic backend selection.
//!
//! Backends are registered by name from any crate, either explicitly through
//! [`register_backend`] or through a static entry in [`BACKEND_REGISTRARS`] that is
//! run the first time the registry is queried.

use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::spec::ExecutionBackend;

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn ExecutionBackend> + Send + Sync>;

/// Registration hooks contributed by backend crates at link time.
#[linkme::distributed_slice]
pub static BACKEND_REGISTRARS: [fn()] = [..];

struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    // A panicking constructor must not make the registry unusable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, BackendConstructor>> {
        self.backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, BackendConstructor>> {
        self.backends
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        debug!(backend = %name, "registered backend");
        self.write().insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn ExecutionBackend>> {
        let registry = self.read();
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
static RUN_REGISTRARS: Once = Once::new();

fn registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Registry with link-time registrars applied. Registrars call [`register_backend`], which only
/// touches [`registry`], so running them here does not re-enter the `Once`.
fn populated_registry() -> &'static BackendRegistry {
    RUN_REGISTRARS.call_once(|| {
        for registrar in BACKEND_REGISTRARS {
            registrar();
        }
    });
    registry()
}

/// Register a backend by name. Registering an existing name replaces its constructor.
pub fn register_backend<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn ExecutionBackend> + Send + Sync + 'static,
{
    registry().register(name.into(), Box::new(constructor));
}

/// Create a backend instance by name, or `None` if no such backend is registered.
pub fn create_backend(name: &str) -> Option<Arc<dyn ExecutionBackend>> {
    populated_registry().create(name)
}

/// List all registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    populated_registry().list_backends()
}

pub fn has_backend(name: &str) -> bool {
    populated_registry().has_backend(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::spec::{BackendResult, BackendSession};
    use crate::error::Code;
    use crate::graph::GraphHandle;
    use crate::session::SessionOptions;

    struct Refusing;

    impl ExecutionBackend for Refusing {
        fn backend_name(&self) -> &str {
            "refusing"
        }

        fn open_session(
            &self,
            _graph: Arc<GraphHandle>,
            _options: &SessionOptions,
        ) -> BackendResult<Box<dyn BackendSession>> {
            Err(crate::backend::BackendError::new(Code::Unavailable, "no"))
        }
    }

    #[test]
    fn registered_backends_can_be_created() {
        register_backend("registry-test-refusing", || Arc::new(Refusing));
        assert!(has_backend("registry-test-refusing"));
        assert!(list_backends().contains(&"registry-test-refusing".to_string()));
        let backend = create_backend("registry-test-refusing").unwrap();
        assert_eq!(backend.backend_name(), "refusing");
        assert!(create_backend("registry-test-missing").is_none());
    }
}
