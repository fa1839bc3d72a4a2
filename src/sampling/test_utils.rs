use crate::core::{
    DiskIo, GpuCapability, GpuReading, GpuSource, ProcessSample, ProcessSource, SystemOverview,
};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Builds a process sample with the current time and no I/O counters.
pub fn process_sample(pid: u32, name: &str, cpu_percent: f64, memory_percent: f64) -> ProcessSample {
    ProcessSample {
        timestamp: Utc::now(),
        pid,
        name: name.to_string(),
        cpu_percent,
        memory_percent,
        io_read_bytes: None,
        io_write_bytes: None,
    }
}

#[derive(Default)]
struct ScriptState {
    snapshots: VecDeque<Vec<ProcessSample>>,
    current: Vec<ProcessSample>,
    vanished: HashSet<u32>,
    sample_calls: usize,
    refresh_calls: usize,
}

/// Fake process source that replays scripted snapshots.
///
/// Each call to `sample_processes` pops the next snapshot; once the script is
/// exhausted the last snapshot is repeated.
#[derive(Clone, Default)]
pub struct ScriptedProcessSource {
    state: Arc<Mutex<ScriptState>>,
    disk_io: Option<DiskIo>,
}

impl ScriptedProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the given disk figures in the overview.
    pub fn with_disk_io(mut self, disk_io: DiskIo) -> Self {
        self.disk_io = Some(disk_io);
        self
    }

    /// Queues a snapshot to be returned by a later `sample_processes` call.
    pub fn push_snapshot(&self, snapshot: Vec<ProcessSample>) {
        self.state.lock().unwrap().snapshots.push_back(snapshot);
    }

    /// Makes `refresh_process` report the pid as gone.
    pub fn vanish(&self, pid: u32) {
        self.state.lock().unwrap().vanished.insert(pid);
    }

    pub fn sample_calls(&self) -> usize {
        self.state.lock().unwrap().sample_calls
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }
}

impl ProcessSource for ScriptedProcessSource {
    fn sample_processes(&self) -> Vec<ProcessSample> {
        let mut state = self.state.lock().unwrap();
        state.sample_calls += 1;
        if let Some(next) = state.snapshots.pop_front() {
            state.current = next;
        }
        let vanished = state.vanished.clone();
        state.current.retain(|s| !vanished.contains(&s.pid));
        state.current.clone()
    }

    fn refresh_process(&self, pid: u32) -> Option<ProcessSample> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        if state.vanished.contains(&pid) {
            return None;
        }
        state.current.iter().find(|s| s.pid == pid).cloned()
    }

    fn overview(&self) -> SystemOverview {
        SystemOverview {
            cpu_percent: 12.5,
            memory_used_bytes: 4 * 1024 * 1024 * 1024,
            memory_total_bytes: 16 * 1024 * 1024 * 1024,
            disk_io: self.disk_io,
        }
    }
}

/// Fake GPU source returning fixed readings.
#[derive(Clone)]
pub struct FakeGpuSource {
    capability: GpuCapability,
    readings: Vec<GpuReading>,
}

impl FakeGpuSource {
    /// A source on a host without GPU telemetry.
    pub fn absent() -> Self {
        Self {
            capability: GpuCapability::Absent,
            readings: Vec::new(),
        }
    }

    /// A source reporting the given readings, one device per reading.
    pub fn with_readings(readings: Vec<GpuReading>) -> Self {
        Self {
            capability: GpuCapability::Present {
                device_count: readings.len() as u32,
            },
            readings,
        }
    }
}

impl GpuSource for FakeGpuSource {
    fn capability(&self) -> GpuCapability {
        self.capability
    }

    fn read_devices(&self) -> Vec<GpuReading> {
        self.readings.clone()
    }
}
