//! Integration tests for the collector loop against the in-memory store.

use procmon::app::CollectorApp;
use procmon::collector::{Collector, CollectorError, CollectorState};
use procmon::config::Config;
use procmon::core::GpuReading;
use procmon::internal_metrics::Metrics;
use procmon::sampling::test_utils::{process_sample, FakeGpuSource, ScriptedProcessSource};
use procmon::store::memory::MemoryStore;
use procmon::store::StoreError;
use procmon::task_manager::TaskManager;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{fast_settings, sources, wait_until};

const WAIT: Duration = Duration::from_secs(5);

fn busy_processes() -> ScriptedProcessSource {
    let processes = ScriptedProcessSource::new();
    processes.push_snapshot(vec![
        process_sample(100, "python", 50.0, 2.0),
        process_sample(200, "postgres", 5.0, 8.0),
    ]);
    processes
}

fn t4() -> GpuReading {
    GpuReading {
        index: 0,
        name: Some("Tesla T4".to_string()),
        utilization_gpu: Some(40),
        utilization_memory: Some(15),
        temperature_c: Some(60),
        fan_percent: None,
        power_watts: Some(30.0),
    }
}

#[tokio::test]
async fn test_collector_persists_ticks_and_removes_pidfile() {
    let dir = tempdir().unwrap();
    let pidfile = dir.path().join("collector.pid");
    let store = MemoryStore::new();
    let collector = Collector::new(
        sources(&busy_processes(), FakeGpuSource::absent()),
        Arc::new(store.clone()),
        fast_settings(&pidfile, 3),
        Metrics::disabled(),
    );
    let mut state = collector.state();
    let tasks = TaskManager::new();
    let handle = tokio::spawn(collector.run(tasks.get_shutdown_rx()));

    assert!(wait_until(|| store.write_batches() >= 2, WAIT).await);
    assert_eq!(*state.borrow_and_update(), CollectorState::Running);
    let recorded = std::fs::read_to_string(&pidfile).unwrap();
    assert_eq!(recorded, std::process::id().to_string());

    tasks.trigger_shutdown();
    handle.await.unwrap().unwrap();

    assert!(!pidfile.exists());
    assert_eq!(*state.borrow(), CollectorState::Stopped);
    assert_eq!(store.closed_connections(), 1);
    assert_eq!(store.schema_runs(), 0);
    let rows = store.process_rows();
    assert!(rows.len() >= 4);
    assert!(rows.iter().any(|r| r.pid == 100 && r.name == "python"));
    assert!(store.gpu_rows().is_empty());
}

#[tokio::test]
async fn test_collector_writes_gpu_batches_when_present() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::new();
    let collector = Collector::new(
        sources(&busy_processes(), FakeGpuSource::with_readings(vec![t4()])),
        Arc::new(store.clone()),
        fast_settings(&dir.path().join("collector.pid"), 3),
        Metrics::disabled(),
    );
    let tasks = TaskManager::new();
    let handle = tokio::spawn(collector.run(tasks.get_shutdown_rx()));

    assert!(wait_until(|| !store.gpu_rows().is_empty(), WAIT).await);
    tasks.trigger_shutdown();
    handle.await.unwrap().unwrap();

    let gpu = &store.gpu_rows()[0];
    assert_eq!(gpu.gpu_index, 0);
    assert_eq!(gpu.gpu_name, "Tesla T4");
    assert_eq!(gpu.utilization_gpu, 40.0);
    assert_eq!(gpu.fan_speed, None);
}

#[tokio::test]
async fn test_empty_ticks_write_nothing() {
    let dir = tempdir().unwrap();
    let processes = ScriptedProcessSource::new();
    processes.push_snapshot(Vec::new());
    let store = MemoryStore::new();
    let collector = Collector::new(
        sources(&processes, FakeGpuSource::absent()),
        Arc::new(store.clone()),
        fast_settings(&dir.path().join("collector.pid"), 3),
        Metrics::disabled(),
    );
    let tasks = TaskManager::new();
    let handle = tokio::spawn(collector.run(tasks.get_shutdown_rx()));

    assert!(wait_until(|| processes.sample_calls() >= 3, WAIT).await);
    tasks.trigger_shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(store.write_batches(), 0);
    assert!(store.process_rows().is_empty());
}

#[tokio::test]
async fn test_write_failure_triggers_reconnect() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::new();
    store.fail_next_writes(1);
    let collector = Collector::new(
        sources(&busy_processes(), FakeGpuSource::absent()),
        Arc::new(store.clone()),
        fast_settings(&dir.path().join("collector.pid"), 3),
        Metrics::disabled(),
    );
    let state = collector.state();
    let tasks = TaskManager::new();
    let handle = tokio::spawn(collector.run(tasks.get_shutdown_rx()));

    assert!(wait_until(|| store.write_batches() >= 2, WAIT).await);
    assert_eq!(store.connect_attempts(), 2);
    assert!(store.closed_connections() >= 1);
    assert_eq!(*state.borrow(), CollectorState::Running);

    tasks.trigger_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_stop_the_collector() {
    let dir = tempdir().unwrap();
    let pidfile = dir.path().join("collector.pid");
    let store = MemoryStore::new();
    store.fail_next_connects(10);
    let collector = Collector::new(
        sources(&busy_processes(), FakeGpuSource::absent()),
        Arc::new(store.clone()),
        fast_settings(&pidfile, 3),
        Metrics::disabled(),
    );
    let state = collector.state();
    let tasks = TaskManager::new();

    let result = collector.run(tasks.get_shutdown_rx()).await;

    match result {
        Err(CollectorError::ConnectionExhausted(StoreError::Exhausted { attempts, .. })) => {
            assert_eq!(attempts, 3)
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    assert_eq!(store.connect_attempts(), 3);
    assert!(!pidfile.exists());
    assert_eq!(*state.borrow(), CollectorState::Stopped);
}

#[tokio::test]
async fn test_shutdown_while_retrying_is_clean() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::new();
    store.fail_next_connects(u32::MAX);
    let mut settings = fast_settings(&dir.path().join("collector.pid"), 100);
    settings.retry.delay_seconds = 1;
    let collector = Collector::new(
        sources(&busy_processes(), FakeGpuSource::absent()),
        Arc::new(store.clone()),
        settings,
        Metrics::disabled(),
    );
    let tasks = TaskManager::new();
    let handle = tokio::spawn(collector.run(tasks.get_shutdown_rx()));

    assert!(wait_until(|| store.connect_attempts() >= 1, WAIT).await);
    tasks.trigger_shutdown();
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();

    assert!(result.is_ok());
    assert!(store.connect_attempts() < 100);
}

#[tokio::test]
async fn test_collector_app_runs_with_overrides() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.collector.pidfile = dir.path().join("collector.pid");
    config.metrics.enabled = false;
    let store = MemoryStore::new();

    let app = CollectorApp::builder(config)
        .sources_override(sources(&busy_processes(), FakeGpuSource::absent()))
        .connector_override(Arc::new(store.clone()))
        .metrics_override(Metrics::disabled())
        .build();
    assert_eq!(app.metrics_addr(), None);
    let tasks = app.task_manager();
    let handle = tokio::spawn(app.run());

    // The default interval is seconds long; the first tick fires immediately.
    assert!(wait_until(|| store.write_batches() >= 1, WAIT).await);
    tasks.trigger_shutdown();
    handle.await.unwrap().unwrap();
    assert!(!dir.path().join("collector.pid").exists());
}
