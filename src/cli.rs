//! Command-line interface.
//!
//! Global options also act as the highest-precedence configuration layer:
//! `Cli` implements `figment::Provider`.

use crate::history::{Domain, HistoryRequest, OutputFormat};
use clap::{Args, Parser, Subcommand};
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Process and GPU monitoring: a background collector, a live dashboard and
/// historical queries.
#[derive(Parser, Debug)]
#[command(name = "procmon", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Database connection URL.
    #[arg(long, value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create the database tables if they do not exist.
    SetupDb,
    /// Start the collector in the background.
    StartCollector,
    /// Stop the background collector.
    StopCollector,
    /// Report whether the background collector is running.
    StatusCollector,
    /// Show a live dashboard of processes and GPUs.
    Live,
    /// Query historical process or GPU data.
    History(HistoryArgs),
    /// Run the collector in the foreground.
    #[command(hide = true)]
    RunCollector,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct HistoryArgs {
    /// Only processes whose name contains this text (case-insensitive).
    #[arg(long)]
    pub process_name: Option<String>,

    /// Only this process id (raw data only).
    #[arg(long)]
    pub pid: Option<u32>,

    /// Earliest time to include, e.g. "2024-01-01 08:00:00".
    #[arg(long)]
    pub start_time: Option<String>,

    /// Latest time to include.
    #[arg(long)]
    pub end_time: Option<String>,

    /// Rollup granularity: hourly, daily, weekly or monthly.
    #[arg(long)]
    pub aggregate: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,

    /// Query GPU data instead of process data.
    #[arg(long)]
    pub gpu: bool,

    /// Only this GPU (with --gpu).
    #[arg(long, value_name = "N")]
    pub gpu_index: Option<u32>,
}

impl Cli {
    /// The log filter for this invocation, or `None` when nothing should be
    /// logged. The dashboard owns the terminal, and the one-shot collector
    /// commands already report on stdout, so those stay at `warn` unless a
    /// level is given on the command line.
    pub fn tracing_level<'a>(&'a self, configured: &'a str) -> Option<&'a str> {
        match self.command {
            Command::Live => None,
            Command::SetupDb
            | Command::StartCollector
            | Command::StopCollector
            | Command::StatusCollector => Some(self.log_level.as_deref().unwrap_or("warn")),
            Command::History(_) | Command::RunCollector => Some(configured),
        }
    }
}

impl HistoryArgs {
    pub fn to_request(&self) -> HistoryRequest {
        HistoryRequest {
            domain: if self.gpu { Domain::Gpu } else { Domain::Process },
            process_name: self.process_name.clone(),
            pid: self.pid,
            gpu_index: self.gpu_index,
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            aggregate: self.aggregate.clone(),
            output_format: self.output_format,
        }
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(url) = &self.database_url {
            let mut database = Dict::new();
            database.insert("url".into(), Value::from(url.clone()));
            dict.insert("database".into(), Value::Dict(Tag::Default, database));
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
