//! Translation of a history request into a store-independent query plan.
//!
//! The plan decides which table is read, which filters apply, the sort key and
//! the page size. The Postgres store renders it to SQL with `to_sql`; the
//! in-memory test store interprets it directly.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors detected locally, before any store round-trip.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid aggregate level '{0}'. Choose from hourly, daily, weekly, monthly.")]
    InvalidAggregate(String),

    #[error("Invalid {field} '{value}'. Use RFC 3339, 'YYYY-MM-DD HH:MM:SS', 'YYYY-MM-DD' or 'now'.")]
    InvalidTime { field: &'static str, value: String },

    #[error("Invalid {field} {value}: out of range")]
    OutOfRange { field: &'static str, value: u32 },
}

/// Which family of samples a history request reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Domain {
    #[default]
    Process,
    Gpu,
}

/// Bucket width of a store-maintained rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Granularity::Hourly),
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(ValidationError::InvalidAggregate(other.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How query results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

/// A history request as the user expressed it, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRequest {
    pub domain: Domain,
    pub process_name: Option<String>,
    pub pid: Option<u32>,
    pub gpu_index: Option<u32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub aggregate: Option<String>,
    pub output_format: OutputFormat,
}

/// The table or rollup a plan reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Processes,
    ProcessRollup(Granularity),
    Gpu,
}

impl Source {
    pub fn table(&self) -> String {
        match self {
            Source::Processes => "processes".to_string(),
            Source::ProcessRollup(granularity) => format!("processes_{}", granularity),
            Source::Gpu => "gpu_usage".to_string(),
        }
    }

    /// The column holding the row's point in time, which is also the sort key.
    pub fn time_column(&self) -> &'static str {
        match self {
            Source::ProcessRollup(_) => "bucket",
            Source::Processes | Source::Gpu => "time",
        }
    }

    fn select_list(&self) -> &'static str {
        match self {
            Source::Processes => {
                "time, pid, name, cpu_percent::float8 AS cpu_percent, \
                 memory_percent::float8 AS memory_percent, io_read_bytes, io_write_bytes"
            }
            Source::ProcessRollup(_) => {
                "bucket, name, max_cpu_percent::float8 AS max_cpu_percent, \
                 avg_cpu_percent::float8 AS avg_cpu_percent, \
                 max_memory_percent::float8 AS max_memory_percent, \
                 avg_memory_percent::float8 AS avg_memory_percent"
            }
            Source::Gpu => {
                "time, gpu_index, gpu_name, utilization_gpu::float8 AS utilization_gpu, \
                 utilization_memory::float8 AS utilization_memory, \
                 temperature_gpu::float8 AS temperature_gpu, fan_speed::float8 AS fan_speed, \
                 power_usage::float8 AS power_usage"
            }
        }
    }
}

/// A single filter of a plan. Time bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Case-insensitive literal substring of the process name.
    NameContains(String),
    Pid(i32),
    GpuIndex(i32),
    Since(DateTime<Utc>),
    Until(DateTime<Utc>),
}

/// A validated, store-independent description of a history query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub source: Source,
    pub predicates: Vec<Predicate>,
    pub limit: i64,
}

impl QueryPlan {
    /// Validates a request and applies the query-shape rules.
    ///
    /// GPU requests always read the raw GPU table, ignoring any aggregate.
    /// Process requests with an aggregate read the matching rollup, where the
    /// pid filter does not apply because rollup rows carry no pid.
    pub fn from_request(request: &HistoryRequest, limit: i64) -> Result<Self, ValidationError> {
        let granularity = request
            .aggregate
            .as_deref()
            .map(str::parse::<Granularity>)
            .transpose()?;
        let since = request
            .start_time
            .as_deref()
            .map(|value| parse_time_bound("start time", value))
            .transpose()?;
        let until = request
            .end_time
            .as_deref()
            .map(|value| parse_time_bound("end time", value))
            .transpose()?;

        let source = match (request.domain, granularity) {
            (Domain::Gpu, Some(granularity)) => {
                debug!(%granularity, "Aggregation is not available for GPU data, querying raw samples");
                Source::Gpu
            }
            (Domain::Gpu, None) => Source::Gpu,
            (Domain::Process, Some(granularity)) => Source::ProcessRollup(granularity),
            (Domain::Process, None) => Source::Processes,
        };

        let mut predicates = Vec::new();
        match source {
            Source::Processes | Source::ProcessRollup(_) => {
                if let Some(name) = request.process_name.as_deref().filter(|n| !n.is_empty()) {
                    predicates.push(Predicate::NameContains(name.to_string()));
                }
                if let Some(pid) = request.pid {
                    if matches!(source, Source::Processes) {
                        let pid = i32::try_from(pid)
                            .map_err(|_| ValidationError::OutOfRange { field: "pid", value: pid })?;
                        predicates.push(Predicate::Pid(pid));
                    } else {
                        debug!(pid, "Rollup rows carry no pid, ignoring the pid filter");
                    }
                }
            }
            Source::Gpu => {
                if let Some(index) = request.gpu_index {
                    let index = i32::try_from(index).map_err(|_| ValidationError::OutOfRange {
                        field: "gpu index",
                        value: index,
                    })?;
                    predicates.push(Predicate::GpuIndex(index));
                }
                if request.process_name.is_some() || request.pid.is_some() {
                    debug!("Process filters do not apply to GPU data");
                }
            }
        }
        if let Some(since) = since {
            predicates.push(Predicate::Since(since));
        }
        if let Some(until) = until {
            predicates.push(Predicate::Until(until));
        }

        Ok(Self {
            source,
            predicates,
            limit,
        })
    }

    /// Renders the plan as Postgres SQL with `$n` placeholders, numbered in
    /// the order of `predicates`.
    pub fn to_sql(&self) -> String {
        let time_column = self.source.time_column();
        let conditions: Vec<String> = self
            .predicates
            .iter()
            .enumerate()
            .map(|(i, predicate)| {
                let n = i + 1;
                match predicate {
                    Predicate::NameContains(_) => format!("name ILIKE ${}", n),
                    Predicate::Pid(_) => format!("pid = ${}", n),
                    Predicate::GpuIndex(_) => format!("gpu_index = ${}", n),
                    Predicate::Since(_) => format!("{} >= ${}", time_column, n),
                    Predicate::Until(_) => format!("{} <= ${}", time_column, n),
                }
            })
            .collect();

        let mut sql = format!("SELECT {} FROM {}", self.source.select_list(), self.source.table());
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {} DESC LIMIT {}", time_column, self.limit));
        sql
    }
}

/// Builds an ILIKE pattern matching `needle` literally anywhere in the value.
pub fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Parses a user-supplied time bound. Times without an offset are UTC.
pub fn parse_time_bound(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(ValidationError::InvalidTime {
        field,
        value: value.to_string(),
    })
}
