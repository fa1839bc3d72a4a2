//! PostgreSQL (TimescaleDB) store.
//!
//! One `PgConnection` per session; the collector holds a single long-lived
//! session and replaces it on failure, so no pool is needed.

use super::{StoreConnection, StoreConnector, StoreError};
use crate::core::{GpuSample, ProcessSample};
use crate::history::query::like_pattern;
use crate::history::record::{AggregateBucket, GpuRow, ProcessRow};
use crate::history::{HistoryRecord, Predicate, QueryPlan, Source};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Key of the advisory lock serializing concurrent schema setup.
const SCHEMA_LOCK_KEY: i64 = 0x7072_6f63_6d6f_6e;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS processes (
        time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        pid INTEGER,
        name VARCHAR(255),
        cpu_percent REAL,
        memory_percent REAL,
        io_read_bytes BIGINT,
        io_write_bytes BIGINT
    )",
    "ALTER TABLE processes ADD COLUMN IF NOT EXISTS io_read_bytes BIGINT",
    "ALTER TABLE processes ADD COLUMN IF NOT EXISTS io_write_bytes BIGINT",
    "CREATE INDEX IF NOT EXISTS processes_time_idx ON processes (time DESC)",
    "CREATE TABLE IF NOT EXISTS gpu_usage (
        time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        gpu_index INTEGER,
        gpu_name VARCHAR(255),
        utilization_gpu REAL,
        utilization_memory REAL,
        temperature_gpu REAL,
        fan_speed REAL,
        power_usage REAL
    )",
    "CREATE INDEX IF NOT EXISTS gpu_usage_time_idx ON gpu_usage (time DESC)",
];

pub struct PostgresConnector {
    url: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            write_timeout,
        }
    }
}

/// Strips the userinfo part of a connection URL.
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl StoreConnector for PostgresConnector {
    fn endpoint(&self) -> String {
        redact_url(&self.url)
    }

    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = timeout(self.connect_timeout, PgConnection::connect(&self.url))
            .await
            .map_err(|_| {
                StoreError::Connection(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!(endpoint = %self.endpoint(), "Opened database connection");
        Ok(Box::new(PostgresConnection {
            conn,
            write_timeout: self.write_timeout,
        }))
    }
}

pub struct PostgresConnection {
    conn: PgConnection,
    write_timeout: Duration,
}

impl PostgresConnection {
    /// Executes one batch insert inside its own transaction.
    async fn write_batch(
        &mut self,
        table: &'static str,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> Result<u64, StoreError> {
        let conn = &mut self.conn;
        let write = async {
            let mut tx = conn.begin().await?;
            match builder.build().execute(&mut *tx).await {
                Ok(done) => {
                    tx.commit().await?;
                    Ok::<u64, sqlx::Error>(done.rows_affected())
                }
                Err(e) => {
                    let _ = tx.rollback().await;
                    Err(e)
                }
            }
        };
        match timeout(self.write_timeout, write).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => Err(StoreError::Write(format!("{}: {}", table, e))),
            Err(_) => Err(StoreError::Write(format!(
                "{}: timed out after {:?}",
                table, self.write_timeout
            ))),
        }
    }
}

fn bind_predicate<'q>(
    query: Query<'q, Postgres, PgArguments>,
    predicate: &Predicate,
) -> Query<'q, Postgres, PgArguments> {
    match predicate {
        Predicate::NameContains(needle) => query.bind(like_pattern(needle)),
        Predicate::Pid(pid) => query.bind(*pid),
        Predicate::GpuIndex(index) => query.bind(*index),
        Predicate::Since(t) | Predicate::Until(t) => query.bind(*t),
    }
}

fn decode_row(source: Source, row: &PgRow) -> Result<HistoryRecord, sqlx::Error> {
    let record = match source {
        Source::Processes => HistoryRecord::Process(ProcessRow {
            time: row.try_get("time")?,
            pid: row.try_get::<Option<i32>, _>("pid")?.unwrap_or_default(),
            name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
            cpu_percent: row.try_get::<Option<f64>, _>("cpu_percent")?.unwrap_or_default(),
            memory_percent: row.try_get::<Option<f64>, _>("memory_percent")?.unwrap_or_default(),
            io_read_bytes: row.try_get("io_read_bytes")?,
            io_write_bytes: row.try_get("io_write_bytes")?,
        }),
        Source::ProcessRollup(_) => HistoryRecord::Aggregate(AggregateBucket {
            bucket_start: row.try_get::<DateTime<Utc>, _>("bucket")?,
            name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
            max_cpu_percent: row.try_get::<Option<f64>, _>("max_cpu_percent")?.unwrap_or_default(),
            avg_cpu_percent: row.try_get::<Option<f64>, _>("avg_cpu_percent")?.unwrap_or_default(),
            max_memory_percent: row
                .try_get::<Option<f64>, _>("max_memory_percent")?
                .unwrap_or_default(),
            avg_memory_percent: row
                .try_get::<Option<f64>, _>("avg_memory_percent")?
                .unwrap_or_default(),
        }),
        Source::Gpu => HistoryRecord::Gpu(GpuRow {
            time: row.try_get("time")?,
            gpu_index: row.try_get::<Option<i32>, _>("gpu_index")?.unwrap_or_default(),
            gpu_name: row.try_get::<Option<String>, _>("gpu_name")?.unwrap_or_default(),
            utilization_gpu: row.try_get::<Option<f64>, _>("utilization_gpu")?.unwrap_or_default(),
            utilization_memory: row
                .try_get::<Option<f64>, _>("utilization_memory")?
                .unwrap_or_default(),
            temperature_gpu: row.try_get("temperature_gpu")?,
            fan_speed: row.try_get("fan_speed")?,
            power_usage: row.try_get("power_usage")?,
        }),
    };
    Ok(record)
}

#[async_trait]
impl StoreConnection for PostgresConnection {
    async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        let schema_err = |e: sqlx::Error| StoreError::Schema(e.to_string());
        let mut tx = self.conn.begin().await.map_err(schema_err)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(schema_err)?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(schema_err)?;
        }
        tx.commit().await.map_err(schema_err)?;
        info!("Database schema is ready");
        Ok(())
    }

    async fn insert_processes(&mut self, samples: &[ProcessSample]) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO processes \
             (time, pid, name, cpu_percent, memory_percent, io_read_bytes, io_write_bytes) ",
        );
        builder.push_values(samples, |mut row, sample| {
            row.push("NOW()")
                .push_bind(sample.pid as i32)
                .push_bind(sample.name.clone())
                .push_bind(sample.cpu_percent as f32)
                .push_bind(sample.memory_percent as f32)
                .push_bind(sample.io_read_bytes.map(|b| b as i64))
                .push_bind(sample.io_write_bytes.map(|b| b as i64));
        });
        self.write_batch("processes", builder).await
    }

    async fn insert_gpus(&mut self, samples: &[GpuSample]) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO gpu_usage \
             (time, gpu_index, gpu_name, utilization_gpu, utilization_memory, \
             temperature_gpu, fan_speed, power_usage) ",
        );
        builder.push_values(samples, |mut row, sample| {
            row.push("NOW()")
                .push_bind(sample.gpu_index as i32)
                .push_bind(sample.gpu_name.clone())
                .push_bind(sample.utilization_gpu as f32)
                .push_bind(sample.utilization_memory as f32)
                .push_bind(sample.temperature_c.map(|v| v as f32))
                .push_bind(sample.fan_percent.map(|v| v as f32))
                .push_bind(sample.power_watts.map(|v| v as f32));
        });
        self.write_batch("gpu_usage", builder).await
    }

    async fn fetch(&mut self, plan: &QueryPlan) -> Result<Vec<HistoryRecord>, StoreError> {
        let sql = plan.to_sql();
        debug!(%sql, "Running history query");
        let query = plan
            .predicates
            .iter()
            .fold(sqlx::query(&sql), bind_predicate);
        let rows = query
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        rows.iter()
            .map(|row| decode_row(plan.source, row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Error while closing database connection");
        }
    }
}
