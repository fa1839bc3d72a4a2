use super::query::{OutputFormat, Source};
use super::record::HistoryRecord;
use chrono::{DateTime, Utc};
use tabled::{settings::Style, Table, Tabled};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output was not valid text: {0}")]
    Encoding(String),
}

/// Formats a page of history results for printing.
pub trait RecordFormatter: Send + Sync {
    fn format_records(&self, source: Source, records: &[HistoryRecord]) -> Result<String, RenderError>;
}

pub fn formatter_for(format: OutputFormat) -> Box<dyn RecordFormatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// A JSON array of objects keyed by column name.
pub struct JsonFormatter;

impl RecordFormatter for JsonFormatter {
    fn format_records(&self, _source: Source, records: &[HistoryRecord]) -> Result<String, RenderError> {
        Ok(serde_json::to_string_pretty(records)?)
    }
}

/// CSV with a header row of column names.
pub struct CsvFormatter;

impl RecordFormatter for CsvFormatter {
    fn format_records(&self, _source: Source, records: &[HistoryRecord]) -> Result<String, RenderError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            match record {
                HistoryRecord::Process(row) => writer.serialize(row)?,
                HistoryRecord::Aggregate(bucket) => writer.serialize(bucket)?,
                HistoryRecord::Gpu(row) => writer.serialize(row)?,
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| RenderError::Encoding(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| RenderError::Encoding(e.to_string()))
    }
}

/// A titled text table, one row per record.
pub struct TableFormatter;

#[derive(Tabled)]
struct ProcessTableRow {
    #[tabled(rename = "Timestamp", display_with = "timestamp")]
    time: DateTime<Utc>,
    #[tabled(rename = "PID")]
    pid: i32,
    #[tabled(rename = "Process Name")]
    name: String,
    #[tabled(rename = "CPU %", display_with = "two_places")]
    cpu_percent: f64,
    #[tabled(rename = "Memory %", display_with = "two_places")]
    memory_percent: f64,
}

#[derive(Tabled)]
struct RollupTableRow {
    #[tabled(rename = "Time Bucket", display_with = "timestamp")]
    bucket_start: DateTime<Utc>,
    #[tabled(rename = "Process Name")]
    name: String,
    #[tabled(rename = "Max CPU %", display_with = "two_places")]
    max_cpu_percent: f64,
    #[tabled(rename = "Avg CPU %", display_with = "two_places")]
    avg_cpu_percent: f64,
    #[tabled(rename = "Max Memory %", display_with = "two_places")]
    max_memory_percent: f64,
    #[tabled(rename = "Avg Memory %", display_with = "two_places")]
    avg_memory_percent: f64,
}

#[derive(Tabled)]
struct GpuTableRow {
    #[tabled(rename = "Timestamp", display_with = "timestamp")]
    time: DateTime<Utc>,
    #[tabled(rename = "GPU")]
    gpu_index: i32,
    #[tabled(rename = "Name")]
    gpu_name: String,
    #[tabled(rename = "GPU Util %", display_with = "one_place")]
    utilization_gpu: f64,
    #[tabled(rename = "Mem Util %", display_with = "one_place")]
    utilization_memory: f64,
    #[tabled(rename = "Temp °C", display_with = "whole_or_na")]
    temperature_gpu: Option<f64>,
    #[tabled(rename = "Fan %", display_with = "whole_or_na")]
    fan_speed: Option<f64>,
    #[tabled(rename = "Power W", display_with = "one_place_or_na")]
    power_usage: Option<f64>,
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn two_places(value: &f64) -> String {
    format!("{:.2}", value)
}

fn one_place(value: &f64) -> String {
    format!("{:.1}", value)
}

fn whole_or_na(value: &Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.0}", v))
}

fn one_place_or_na(value: &Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.1}", v))
}

impl TableFormatter {
    fn title(source: Source) -> String {
        match source {
            Source::Processes => "Historical Process Data (Raw)".to_string(),
            Source::ProcessRollup(granularity) => {
                format!("Historical Process Data ({})", granularity)
            }
            Source::Gpu => "Historical GPU Data (Raw)".to_string(),
        }
    }

    fn table(source: Source, records: &[HistoryRecord]) -> Table {
        match source {
            Source::Processes => Table::new(records.iter().filter_map(|record| match record {
                HistoryRecord::Process(row) => Some(ProcessTableRow {
                    time: row.time,
                    pid: row.pid,
                    name: row.name.clone(),
                    cpu_percent: row.cpu_percent,
                    memory_percent: row.memory_percent,
                }),
                _ => None,
            })),
            Source::ProcessRollup(_) => Table::new(records.iter().filter_map(|record| match record {
                HistoryRecord::Aggregate(bucket) => Some(RollupTableRow {
                    bucket_start: bucket.bucket_start,
                    name: bucket.name.clone(),
                    max_cpu_percent: bucket.max_cpu_percent,
                    avg_cpu_percent: bucket.avg_cpu_percent,
                    max_memory_percent: bucket.max_memory_percent,
                    avg_memory_percent: bucket.avg_memory_percent,
                }),
                _ => None,
            })),
            Source::Gpu => Table::new(records.iter().filter_map(|record| match record {
                HistoryRecord::Gpu(row) => Some(GpuTableRow {
                    time: row.time,
                    gpu_index: row.gpu_index,
                    gpu_name: row.gpu_name.clone(),
                    utilization_gpu: row.utilization_gpu,
                    utilization_memory: row.utilization_memory,
                    temperature_gpu: row.temperature_gpu,
                    fan_speed: row.fan_speed,
                    power_usage: row.power_usage,
                }),
                _ => None,
            })),
        }
    }
}

impl RecordFormatter for TableFormatter {
    fn format_records(&self, source: Source, records: &[HistoryRecord]) -> Result<String, RenderError> {
        let mut table = Self::table(source, records);
        table.with(Style::modern());
        Ok(format!("{}\n{}\n", Self::title(source), table))
    }
}
