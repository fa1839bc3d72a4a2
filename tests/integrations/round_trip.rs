//! Samples written by the collector come back through the history engine.

use procmon::collector::Collector;
use procmon::history::{
    Domain, HistoryEngine, HistoryOutcome, HistoryRecord, HistoryRequest, OutputFormat,
};
use procmon::internal_metrics::Metrics;
use procmon::sampling::test_utils::{process_sample, FakeGpuSource, ScriptedProcessSource};
use procmon::store::memory::MemoryStore;
use procmon::store::StoreConnector;
use procmon::core::GpuReading;
use procmon::task_manager::TaskManager;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{at, fast_settings, sources, wait_until};

#[tokio::test]
async fn test_schema_setup_is_idempotent() {
    let store = MemoryStore::new();
    for _ in 0..2 {
        let mut connection = store.connect().await.unwrap();
        connection.ensure_schema().await.unwrap();
        connection.close().await;
    }
    assert_eq!(store.schema_runs(), 2);
    assert_eq!(store.closed_connections(), 2);
}

#[tokio::test]
async fn test_collected_samples_are_queryable() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::new();
    store.set_clock(at("2024-05-06T12:00:00Z"));

    let processes = ScriptedProcessSource::new();
    let mut first = process_sample(4321, "trainer", 87.5, 12.25);
    first.io_read_bytes = Some(1 << 20);
    processes.push_snapshot(vec![first, process_sample(1, "init", 0.0, 0.1)]);
    let gpus = FakeGpuSource::with_readings(vec![GpuReading {
        index: 0,
        name: Some("A100".to_string()),
        utilization_gpu: Some(99),
        utilization_memory: Some(70),
        temperature_c: Some(71),
        fan_percent: None,
        power_watts: Some(250.0),
    }]);

    let collector = Collector::new(
        sources(&processes, gpus),
        Arc::new(store.clone()),
        fast_settings(&dir.path().join("collector.pid"), 3),
        Metrics::disabled(),
    );
    let tasks = TaskManager::new();
    let handle = tokio::spawn(collector.run(tasks.get_shutdown_rx()));
    assert!(wait_until(|| !store.gpu_rows().is_empty(), Duration::from_secs(5)).await);
    tasks.trigger_shutdown();
    handle.await.unwrap().unwrap();

    let engine = HistoryEngine::new(Arc::new(store.clone()));

    let request = HistoryRequest {
        process_name: Some("train".to_string()),
        ..Default::default()
    };
    match engine.query(&request).await.unwrap() {
        HistoryOutcome::Records { records, .. } => match &records[0] {
            HistoryRecord::Process(row) => {
                assert_eq!(row.pid, 4321);
                assert_eq!(row.time, at("2024-05-06T12:00:00Z"));
                assert_eq!(row.cpu_percent, 87.5);
                assert_eq!(row.memory_percent, 12.25);
                assert_eq!(row.io_read_bytes, Some(1 << 20));
                assert_eq!(row.io_write_bytes, None);
            }
            other => panic!("expected a process row, got {:?}", other),
        },
        HistoryOutcome::NoData => panic!("expected collected rows"),
    }

    let request = HistoryRequest {
        domain: Domain::Gpu,
        output_format: OutputFormat::Csv,
        ..Default::default()
    };
    let mut out = Vec::new();
    engine.run(&request, &mut out).await.unwrap();
    let csv = String::from_utf8(out).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("time,gpu_index,gpu_name,utilization_gpu,utilization_memory,temperature_gpu,fan_speed,power_usage")
    );
    assert_eq!(
        lines.next(),
        Some("2024-05-06T12:00:00Z,0,A100,99.0,70.0,71.0,,250.0")
    );
}
