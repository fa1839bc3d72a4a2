use chrono::{DateTime, Utc};
use serde::Serialize;

/// A raw process sample as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRow {
    pub time: DateTime<Utc>,
    pub pid: i32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub io_read_bytes: Option<i64>,
    pub io_write_bytes: Option<i64>,
}

/// One row of a process rollup: the statistics of one process name within
/// one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateBucket {
    #[serde(rename = "bucket")]
    pub bucket_start: DateTime<Utc>,
    pub name: String,
    pub max_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub avg_memory_percent: f64,
}

/// A raw GPU sample as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuRow {
    pub time: DateTime<Utc>,
    pub gpu_index: i32,
    pub gpu_name: String,
    pub utilization_gpu: f64,
    pub utilization_memory: f64,
    pub temperature_gpu: Option<f64>,
    pub fan_speed: Option<f64>,
    pub power_usage: Option<f64>,
}

/// A single history result. Serialized as a flat object keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistoryRecord {
    Process(ProcessRow),
    Aggregate(AggregateBucket),
    Gpu(GpuRow),
}

impl HistoryRecord {
    /// The row's point in time: the sample time, or the bucket start.
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            HistoryRecord::Process(row) => row.time,
            HistoryRecord::Aggregate(bucket) => bucket.bucket_start,
            HistoryRecord::Gpu(row) => row.time,
        }
    }
}
