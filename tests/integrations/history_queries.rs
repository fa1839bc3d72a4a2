//! Integration tests for the history engine against the in-memory store.

use procmon::history::record::{AggregateBucket, ProcessRow};
use procmon::history::{
    Domain, Granularity, HistoryEngine, HistoryError, HistoryOutcome, HistoryRecord,
    HistoryRequest, OutputFormat, Source, ValidationError, NO_DATA_MESSAGE,
};
use procmon::sampling::test_utils::process_sample;
use procmon::store::memory::MemoryStore;
use std::sync::Arc;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{at, gpu_sample};

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_process_at(at("2024-01-01T10:00:00Z"), &process_sample(100, "python", 50.0, 1.0));
    store.insert_process_at(at("2024-01-01T10:00:05Z"), &process_sample(100, "python", 70.0, 2.0));
    store.insert_process_at(at("2024-01-01T10:00:05Z"), &process_sample(200, "postgres", 3.0, 9.0));
    store.insert_process_at(at("2024-01-02T09:30:00Z"), &process_sample(100, "Python3", 20.0, 4.0));
    store
}

fn engine(store: &MemoryStore) -> HistoryEngine {
    HistoryEngine::new(Arc::new(store.clone()))
}

fn process_rows(outcome: HistoryOutcome) -> Vec<ProcessRow> {
    match outcome {
        HistoryOutcome::Records { records, .. } => records
            .into_iter()
            .map(|record| match record {
                HistoryRecord::Process(row) => row,
                other => panic!("expected raw process rows, got {:?}", other),
            })
            .collect(),
        HistoryOutcome::NoData => panic!("expected records"),
    }
}

fn buckets(outcome: HistoryOutcome) -> Vec<AggregateBucket> {
    match outcome {
        HistoryOutcome::Records { records, .. } => records
            .into_iter()
            .map(|record| match record {
                HistoryRecord::Aggregate(bucket) => bucket,
                other => panic!("expected rollup rows, got {:?}", other),
            })
            .collect(),
        HistoryOutcome::NoData => panic!("expected records"),
    }
}

#[tokio::test]
async fn test_pid_filter_returns_newest_first() {
    let store = seeded_store();
    let request = HistoryRequest {
        pid: Some(100),
        end_time: Some("2024-01-01 23:59:59".to_string()),
        ..Default::default()
    };

    let rows = process_rows(engine(&store).query(&request).await.unwrap());

    let cpu: Vec<f64> = rows.iter().map(|row| row.cpu_percent).collect();
    assert_eq!(cpu, vec![70.0, 50.0]);
    assert_eq!(store.connect_attempts(), 1);
    assert_eq!(store.closed_connections(), 1);
}

#[tokio::test]
async fn test_name_filter_is_case_insensitive_substring() {
    let store = seeded_store();
    let request = HistoryRequest {
        process_name: Some("PYTH".to_string()),
        ..Default::default()
    };

    let rows = process_rows(engine(&store).query(&request).await.unwrap());

    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.pid == 100));
    assert_eq!(rows[0].name, "Python3");
}

#[tokio::test]
async fn test_daily_rollup_buckets_per_name() {
    let store = seeded_store();
    let request = HistoryRequest {
        process_name: Some("python".to_string()),
        aggregate: Some("daily".to_string()),
        ..Default::default()
    };

    let buckets = buckets(engine(&store).query(&request).await.unwrap());

    assert_eq!(buckets.len(), 2);
    let first_day = buckets
        .iter()
        .find(|b| b.bucket_start == at("2024-01-01T00:00:00Z"))
        .unwrap();
    assert_eq!(first_day.name, "python");
    assert_eq!(first_day.max_cpu_percent, 70.0);
    assert_eq!(first_day.avg_cpu_percent, 60.0);
    for bucket in &buckets {
        assert!(bucket.max_cpu_percent >= bucket.avg_cpu_percent);
        assert!(bucket.max_memory_percent >= bucket.avg_memory_percent);
    }
    assert_eq!(buckets[0].bucket_start, at("2024-01-02T00:00:00Z"));
}

#[tokio::test]
async fn test_invalid_aggregate_never_contacts_the_store() {
    let store = seeded_store();
    let request = HistoryRequest {
        aggregate: Some("yearly".to_string()),
        ..Default::default()
    };
    let mut out = Vec::new();

    let err = engine(&store).run(&request, &mut out).await.unwrap_err();

    assert!(matches!(
        err,
        HistoryError::Validation(ValidationError::InvalidAggregate(ref level)) if level == "yearly"
    ));
    assert!(!err.is_connection_failure());
    assert_eq!(
        err.to_string(),
        "Invalid aggregate level 'yearly'. Choose from hourly, daily, weekly, monthly."
    );
    assert_eq!(store.connect_attempts(), 0);
    assert_eq!(store.queries(), 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_invalid_time_is_a_validation_error() {
    let store = seeded_store();
    let request = HistoryRequest {
        start_time: Some("last tuesday".to_string()),
        ..Default::default()
    };

    let err = engine(&store).query(&request).await.unwrap_err();

    assert!(matches!(err, HistoryError::Validation(ValidationError::InvalidTime { .. })));
    assert_eq!(store.connect_attempts(), 0);
}

#[tokio::test]
async fn test_gpu_ignores_aggregation() {
    let store = MemoryStore::new();
    store.insert_gpu_at(at("2024-01-01T10:00:00Z"), &gpu_sample(0, 40.0));
    store.insert_gpu_at(at("2024-01-01T10:00:00Z"), &gpu_sample(1, 90.0));
    let request = HistoryRequest {
        domain: Domain::Gpu,
        aggregate: Some("hourly".to_string()),
        gpu_index: Some(1),
        ..Default::default()
    };

    match engine(&store).query(&request).await.unwrap() {
        HistoryOutcome::Records { source, records } => {
            assert_eq!(source, Source::Gpu);
            assert_eq!(records.len(), 1);
            match &records[0] {
                HistoryRecord::Gpu(row) => {
                    assert_eq!(row.gpu_index, 1);
                    assert_eq!(row.utilization_gpu, 90.0);
                    assert_eq!(row.fan_speed, None);
                }
                other => panic!("expected a GPU row, got {:?}", other),
            }
        }
        HistoryOutcome::NoData => panic!("expected GPU rows"),
    }
}

#[tokio::test]
async fn test_empty_gpu_history_prints_no_data() {
    let store = MemoryStore::new();
    let request = HistoryRequest {
        domain: Domain::Gpu,
        ..Default::default()
    };
    let mut out = Vec::new();

    let outcome = engine(&store).run(&request, &mut out).await.unwrap();

    assert_eq!(outcome, HistoryOutcome::NoData);
    assert_eq!(String::from_utf8(out).unwrap().trim(), NO_DATA_MESSAGE);
}

#[tokio::test]
async fn test_page_is_capped_at_one_hundred_rows() {
    let store = MemoryStore::new();
    let start = at("2024-03-01T00:00:00Z");
    for i in 0..150 {
        store.insert_process_at(
            start + chrono::Duration::seconds(5 * i),
            &process_sample(42, "worker", i as f64, 0.5),
        );
    }

    let rows = process_rows(engine(&store).query(&HistoryRequest::default()).await.unwrap());

    assert_eq!(rows.len(), 100);
    assert_eq!(rows[0].cpu_percent, 149.0);
    assert_eq!(rows[99].cpu_percent, 50.0);
}

#[tokio::test]
async fn test_unreachable_store_is_a_connection_failure() {
    let store = MemoryStore::new();
    store.fail_next_connects(1);

    let err = engine(&store)
        .query(&HistoryRequest::default())
        .await
        .unwrap_err();

    assert!(err.is_connection_failure());
}

#[tokio::test]
async fn test_json_output_of_rollup() {
    let store = seeded_store();
    let request = HistoryRequest {
        process_name: Some("postgres".to_string()),
        aggregate: Some("hourly".to_string()),
        output_format: OutputFormat::Json,
        ..Default::default()
    };
    let mut out = Vec::new();

    engine(&store).run(&request, &mut out).await.unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "postgres");
    assert_eq!(rows[0]["bucket"], "2024-01-01T10:00:00Z");
    assert_eq!(Granularity::Hourly.as_str(), "hourly");
}
