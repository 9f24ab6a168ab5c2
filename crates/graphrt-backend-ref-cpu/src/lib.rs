//! Reference CPU interpreter backend for `graphrt`.

pub mod cpu;
pub mod kernels;

use std::sync::Arc;

pub use cpu::{CpuReferenceBackend, CpuSession};

/// Register the CPU backend with the global backend registry.
///
/// This runs automatically through a link-time registrar, but can also be called manually to
/// ensure the backend is registered. The backend is registered under both "cpu" and
/// "cpu-reference".
pub fn register_cpu_backend() {
    graphrt::backend::register_backend("cpu", || Arc::new(CpuReferenceBackend::new()));
    graphrt::backend::register_backend("cpu-reference", || Arc::new(CpuReferenceBackend::new()));
}

#[linkme::distributed_slice(graphrt::backend::registry::BACKEND_REGISTRARS)]
static REGISTER_CPU_BACKEND: fn() = register_cpu_backend;
