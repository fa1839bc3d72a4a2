//! Core domain types and source traits for procmon
//!
//! This module defines the sample records that flow from the metric sources
//! into the collector and the live view, and the trait contracts the rest of
//! the application uses to talk to the operating system and GPU telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation of a single process, taken during one sampling tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSample {
    /// When the sample was taken on this host. The store stamps rows with
    /// its own clock on insert.
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
    pub name: String,
    /// CPU usage since the previous refresh, may exceed 100 on multi-core hosts.
    pub cpu_percent: f64,
    /// Resident memory as a share of total physical memory.
    pub memory_percent: f64,
    /// Cumulative bytes read from disk, when the platform reports it.
    pub io_read_bytes: Option<u64>,
    /// Cumulative bytes written to disk, when the platform reports it.
    pub io_write_bytes: Option<u64>,
}

/// One observation of a single GPU device, taken during one sampling tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuSample {
    pub timestamp: DateTime<Utc>,
    pub gpu_index: u32,
    pub gpu_name: String,
    pub utilization_gpu: f64,
    pub utilization_memory: f64,
    pub temperature_c: Option<f64>,
    pub fan_percent: Option<f64>,
    pub power_watts: Option<f64>,
}

/// A per-device GPU reading where every metric call may fail on its own.
///
/// The live view renders each missing value as "N/A"; the collector only
/// persists devices whose utilization could be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub index: u32,
    pub name: Option<String>,
    pub utilization_gpu: Option<u32>,
    pub utilization_memory: Option<u32>,
    pub temperature_c: Option<u32>,
    pub fan_percent: Option<u32>,
    pub power_watts: Option<f64>,
}

impl GpuReading {
    /// Converts the reading into a persistable sample.
    ///
    /// Returns `None` when utilization is unavailable, which is treated as a
    /// failed read of the device for this tick.
    pub fn to_sample(&self, timestamp: DateTime<Utc>) -> Option<GpuSample> {
        let (gpu, memory) = (self.utilization_gpu?, self.utilization_memory?);
        Some(GpuSample {
            timestamp,
            gpu_index: self.index,
            gpu_name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("GPU {}", self.index)),
            utilization_gpu: gpu as f64,
            utilization_memory: memory as f64,
            temperature_c: self.temperature_c.map(f64::from),
            fan_percent: self.fan_percent.map(f64::from),
            power_watts: self.power_watts,
        })
    }
}

/// Disk traffic of all processes since the previous full refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskIo {
    pub read_bytes: u64,
    pub written_bytes: u64,
}

/// Host-wide figures shown in the overview panel of the live view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemOverview {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// `None` when the platform does not report per-process disk counters.
    pub disk_io: Option<DiskIo>,
}

impl SystemOverview {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            0.0
        } else {
            self.memory_used_bytes as f64 / self.memory_total_bytes as f64 * 100.0
        }
    }
}

/// Whether GPU telemetry was found when the process started.
///
/// Detected exactly once and passed to every component that branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuCapability {
    Present { device_count: u32 },
    Absent,
}

impl GpuCapability {
    pub fn is_present(&self) -> bool {
        matches!(self, GpuCapability::Present { .. })
    }

    pub fn device_count(&self) -> u32 {
        match self {
            GpuCapability::Present { device_count } => *device_count,
            GpuCapability::Absent => 0,
        }
    }
}

// =============================================================================
// Source Traits
// =============================================================================

/// Enumerates the processes running on this host.
pub trait ProcessSource: Send + Sync {
    /// Samples every live process.
    ///
    /// Processes that vanish mid-enumeration, deny access, or are zombies are
    /// skipped. The result is in enumeration order (ascending pid).
    fn sample_processes(&self) -> Vec<ProcessSample>;

    /// Re-reads a single process, returning `None` if it no longer exists.
    fn refresh_process(&self, pid: u32) -> Option<ProcessSample>;

    /// Host-wide CPU, memory and disk figures.
    fn overview(&self) -> SystemOverview;
}

/// Reads GPU telemetry.
pub trait GpuSource: Send + Sync {
    /// The capability detected at startup.
    fn capability(&self) -> GpuCapability;

    /// Reads every device, with each metric independently fallible.
    fn read_devices(&self) -> Vec<GpuReading>;

    /// Samples every device whose utilization could be read.
    ///
    /// Returns an empty vector, never an error, when no GPU telemetry is
    /// present.
    fn sample_gpus(&self) -> Vec<GpuSample> {
        if !self.capability().is_present() {
            return Vec::new();
        }
        let now = Utc::now();
        self.read_devices()
            .iter()
            .filter_map(|reading| reading.to_sample(now))
            .collect()
    }
}
