//! An in-memory store for tests.
//!
//! Rollups are computed on read with the same bucket boundaries the database
//! uses: hour and day truncation, weeks starting on Monday, calendar months.

use super::{StoreConnection, StoreConnector, StoreError};
use crate::core::{GpuSample, ProcessSample};
use crate::history::record::{AggregateBucket, GpuRow, ProcessRow};
use crate::history::{Granularity, HistoryRecord, Predicate, QueryPlan, Source};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    processes: Vec<ProcessRow>,
    gpus: Vec<GpuRow>,
    clock: Option<DateTime<Utc>>,
    pending_connect_failures: u32,
    pending_write_failures: u32,
    connect_attempts: usize,
    schema_runs: usize,
    queries: usize,
    write_batches: usize,
    closed: usize,
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }
}

/// A shared in-memory store. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Pins the store clock; inserted rows are stamped with it.
    pub fn set_clock(&self, now: DateTime<Utc>) {
        self.lock().clock = Some(now);
    }

    pub fn advance_clock(&self, by: Duration) {
        let mut state = self.lock();
        let now = state.now();
        state.clock = Some(now + by);
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().pending_connect_failures = n;
    }

    /// Makes the next `n` batch writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.lock().pending_write_failures = n;
    }

    /// Stores a process sample at an explicit time.
    pub fn insert_process_at(&self, time: DateTime<Utc>, sample: &ProcessSample) {
        self.lock().processes.push(process_row(time, sample));
    }

    /// Stores a GPU sample at an explicit time.
    pub fn insert_gpu_at(&self, time: DateTime<Utc>, sample: &GpuSample) {
        self.lock().gpus.push(gpu_row(time, sample));
    }

    pub fn process_rows(&self) -> Vec<ProcessRow> {
        self.lock().processes.clone()
    }

    pub fn gpu_rows(&self) -> Vec<GpuRow> {
        self.lock().gpus.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn schema_runs(&self) -> usize {
        self.lock().schema_runs
    }

    pub fn queries(&self) -> usize {
        self.lock().queries
    }

    pub fn write_batches(&self) -> usize {
        self.lock().write_batches
    }

    pub fn closed_connections(&self) -> usize {
        self.lock().closed
    }
}

fn process_row(time: DateTime<Utc>, sample: &ProcessSample) -> ProcessRow {
    // Values round-trip through REAL columns in the database.
    ProcessRow {
        time,
        pid: sample.pid as i32,
        name: sample.name.clone(),
        cpu_percent: sample.cpu_percent as f32 as f64,
        memory_percent: sample.memory_percent as f32 as f64,
        io_read_bytes: sample.io_read_bytes.map(|b| b as i64),
        io_write_bytes: sample.io_write_bytes.map(|b| b as i64),
    }
}

fn gpu_row(time: DateTime<Utc>, sample: &GpuSample) -> GpuRow {
    GpuRow {
        time,
        gpu_index: sample.gpu_index as i32,
        gpu_name: sample.gpu_name.clone(),
        utilization_gpu: sample.utilization_gpu as f32 as f64,
        utilization_memory: sample.utilization_memory as f32 as f64,
        temperature_gpu: sample.temperature_c.map(|v| v as f32 as f64),
        fan_speed: sample.fan_percent.map(|v| v as f32 as f64),
        power_usage: sample.power_watts.map(|v| v as f32 as f64),
    }
}

/// Start of the bucket containing `t`.
pub fn bucket_start(granularity: Granularity, t: DateTime<Utc>) -> DateTime<Utc> {
    let date = t.date_naive();
    let day = match granularity {
        Granularity::Hourly => {
            let hour = t.timestamp().div_euclid(3600) * 3600;
            return DateTime::from_timestamp(hour, 0).unwrap_or(t);
        }
        Granularity::Daily => date,
        Granularity::Weekly => {
            date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
        }
        Granularity::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
    };
    day.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(t)
}

fn rollup(granularity: Granularity, rows: &[ProcessRow]) -> Vec<AggregateBucket> {
    struct Acc {
        max_cpu: f64,
        sum_cpu: f64,
        max_mem: f64,
        sum_mem: f64,
        count: usize,
    }

    let mut groups: BTreeMap<(DateTime<Utc>, String), Acc> = BTreeMap::new();
    for row in rows {
        let key = (bucket_start(granularity, row.time), row.name.clone());
        let acc = groups.entry(key).or_insert(Acc {
            max_cpu: f64::MIN,
            sum_cpu: 0.0,
            max_mem: f64::MIN,
            sum_mem: 0.0,
            count: 0,
        });
        acc.max_cpu = acc.max_cpu.max(row.cpu_percent);
        acc.max_mem = acc.max_mem.max(row.memory_percent);
        acc.sum_cpu += row.cpu_percent;
        acc.sum_mem += row.memory_percent;
        acc.count += 1;
    }

    groups
        .into_iter()
        .map(|((bucket_start, name), acc)| AggregateBucket {
            bucket_start,
            name,
            max_cpu_percent: acc.max_cpu,
            avg_cpu_percent: acc.sum_cpu / acc.count as f64,
            max_memory_percent: acc.max_mem,
            avg_memory_percent: acc.sum_mem / acc.count as f64,
        })
        .collect()
}

fn name_matches(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn keep(record: &HistoryRecord, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Since(t) => record.time() >= *t,
        Predicate::Until(t) => record.time() <= *t,
        Predicate::NameContains(needle) => match record {
            HistoryRecord::Process(row) => name_matches(&row.name, needle),
            HistoryRecord::Aggregate(bucket) => name_matches(&bucket.name, needle),
            HistoryRecord::Gpu(_) => true,
        },
        Predicate::Pid(pid) => match record {
            HistoryRecord::Process(row) => row.pid == *pid,
            _ => true,
        },
        Predicate::GpuIndex(index) => match record {
            HistoryRecord::Gpu(row) => row.gpu_index == *index,
            _ => true,
        },
    }
}

pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn take_write_failure(state: &mut State) -> Result<(), StoreError> {
        if state.pending_write_failures > 0 {
            state.pending_write_failures -= 1;
            return Err(StoreError::Write("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.pending_connect_failures > 0 {
            state.pending_connect_failures -= 1;
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.lock().schema_runs += 1;
        Ok(())
    }

    async fn insert_processes(&mut self, samples: &[ProcessSample]) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        Self::take_write_failure(&mut state)?;
        let now = state.now();
        state
            .processes
            .extend(samples.iter().map(|sample| process_row(now, sample)));
        state.write_batches += 1;
        Ok(samples.len() as u64)
    }

    async fn insert_gpus(&mut self, samples: &[GpuSample]) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        Self::take_write_failure(&mut state)?;
        let now = state.now();
        state
            .gpus
            .extend(samples.iter().map(|sample| gpu_row(now, sample)));
        state.write_batches += 1;
        Ok(samples.len() as u64)
    }

    async fn fetch(&mut self, plan: &QueryPlan) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut state = self.lock();
        state.queries += 1;
        let candidates: Vec<HistoryRecord> = match plan.source {
            Source::Processes => state
                .processes
                .iter()
                .cloned()
                .map(HistoryRecord::Process)
                .collect(),
            Source::ProcessRollup(granularity) => rollup(granularity, &state.processes)
                .into_iter()
                .map(HistoryRecord::Aggregate)
                .collect(),
            Source::Gpu => state.gpus.iter().cloned().map(HistoryRecord::Gpu).collect(),
        };
        drop(state);

        let mut records: Vec<HistoryRecord> = candidates
            .into_iter()
            .filter(|record| plan.predicates.iter().all(|p| keep(record, p)))
            .collect();
        records.sort_by(|a, b| b.time().cmp(&a.time()));
        records.truncate(usize::try_from(plan.limit).unwrap_or(0));
        Ok(records)
    }

    async fn close(self: Box<Self>) {
        self.lock().closed += 1;
    }
}
