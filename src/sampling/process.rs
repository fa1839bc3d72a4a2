//! Process enumeration backed by the `sysinfo` crate.

use crate::core::{DiskIo, ProcessSample, ProcessSource, SystemOverview};
use chrono::Utc;
use std::sync::Mutex;
use sysinfo::{Pid, Process, ProcessStatus, System};
use tracing::trace;

struct Inner {
    system: System,
    last_disk_io: Option<DiskIo>,
}

/// A `ProcessSource` that reads the process table through `sysinfo`.
///
/// CPU percentages are computed by `sysinfo` from the difference between two
/// refreshes, so the first sample after construction reports 0 for every
/// process. The source is meant to be long-lived.
pub struct SysinfoProcessSource {
    inner: Mutex<Inner>,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();
        system.refresh_processes();
        Self {
            inner: Mutex::new(Inner {
                system,
                last_disk_io: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn to_sample(process: &Process, total_memory: u64) -> Option<ProcessSample> {
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            process.memory() as f64 / total_memory as f64 * 100.0
        };
        let disk = process.disk_usage();
        let (io_read_bytes, io_write_bytes) = if sysinfo::IS_SUPPORTED_SYSTEM {
            (Some(disk.total_read_bytes), Some(disk.total_written_bytes))
        } else {
            (None, None)
        };
        Some(ProcessSample {
            timestamp: Utc::now(),
            pid: process.pid().as_u32(),
            name: process.name().to_string(),
            cpu_percent: process.cpu_usage() as f64,
            memory_percent,
            io_read_bytes,
            io_write_bytes,
        })
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoProcessSource {
    fn sample_processes(&self) -> Vec<ProcessSample> {
        let mut inner = self.lock();
        inner.system.refresh_memory();
        inner.system.refresh_processes();

        let total_memory = inner.system.total_memory();
        let mut disk_io = DiskIo::default();
        let mut samples: Vec<ProcessSample> = inner
            .system
            .processes()
            .values()
            .filter_map(|process| {
                let usage = process.disk_usage();
                disk_io.read_bytes += usage.read_bytes;
                disk_io.written_bytes += usage.written_bytes;
                Self::to_sample(process, total_memory)
            })
            .collect();
        samples.sort_by_key(|sample| sample.pid);

        inner.last_disk_io = sysinfo::IS_SUPPORTED_SYSTEM.then_some(disk_io);
        trace!(count = samples.len(), "Sampled processes");
        samples
    }

    fn refresh_process(&self, pid: u32) -> Option<ProcessSample> {
        let mut inner = self.lock();
        let pid = Pid::from_u32(pid);
        if !inner.system.refresh_process(pid) {
            return None;
        }
        let total_memory = inner.system.total_memory();
        inner
            .system
            .process(pid)
            .and_then(|process| Self::to_sample(process, total_memory))
    }

    fn overview(&self) -> SystemOverview {
        let mut inner = self.lock();
        inner.system.refresh_cpu();
        inner.system.refresh_memory();
        SystemOverview {
            cpu_percent: inner.system.global_cpu_info().cpu_usage() as f64,
            memory_used_bytes: inner.system.used_memory(),
            memory_total_bytes: inner.system.total_memory(),
            disk_io: inner.last_disk_io,
        }
    }
}
