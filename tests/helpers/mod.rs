//! Shared builders for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use procmon::collector::pidfile::PidFile;
use procmon::collector::CollectorSettings;
use procmon::core::GpuSample;
use procmon::sampling::test_utils::{FakeGpuSource, ScriptedProcessSource};
use procmon::sampling::Sources;
use procmon::store::RetryPolicy;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Wraps fakes into the source bundle the collector and dashboard consume.
pub fn sources(processes: &ScriptedProcessSource, gpus: FakeGpuSource) -> Sources {
    Sources {
        processes: Arc::new(processes.clone()),
        gpus: Arc::new(gpus),
    }
}

/// Collector settings with a fast tick and no pause between connection
/// attempts.
pub fn fast_settings(pidfile: &Path, max_attempts: u32) -> CollectorSettings {
    CollectorSettings {
        interval: Duration::from_millis(20),
        retry: RetryPolicy {
            max_attempts,
            delay_seconds: 0,
        },
        pidfile: PidFile::new(pidfile),
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn at(timestamp: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(timestamp)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn gpu_sample(gpu_index: u32, utilization_gpu: f64) -> GpuSample {
    GpuSample {
        timestamp: Utc::now(),
        gpu_index,
        gpu_name: "Tesla T4".to_string(),
        utilization_gpu,
        utilization_memory: 12.0,
        temperature_c: Some(54.0),
        fan_percent: None,
        power_watts: Some(31.5),
    }
}
