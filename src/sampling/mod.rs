//! Metric sources: the adapters between the operating system / GPU driver and
//! the uniform sample types in `crate::core`.

pub mod gpu;
pub mod process;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use gpu::NvmlGpuSource;
pub use process::SysinfoProcessSource;
pub use crate::core::{GpuSource, ProcessSource};

use std::sync::Arc;

/// The metric sources shared by the collector and the live view.
///
/// Built once at startup so the GPU capability is detected exactly once.
#[derive(Clone)]
pub struct Sources {
    pub processes: Arc<dyn ProcessSource>,
    pub gpus: Arc<dyn GpuSource>,
}

impl Sources {
    /// Creates the host sources, probing for GPU telemetry.
    pub fn detect() -> Self {
        Self {
            processes: Arc::new(SysinfoProcessSource::new()),
            gpus: Arc::new(NvmlGpuSource::detect()),
        }
    }
}
