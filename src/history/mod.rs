//! The history query engine: validates a request, reads one page of results
//! from the store and renders it.

pub mod query;
pub mod record;
pub mod render;

use crate::store::{StoreConnector, StoreError};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use query::{
    Domain, Granularity, HistoryRequest, OutputFormat, Predicate, QueryPlan, Source,
    ValidationError,
};
pub use record::HistoryRecord;
pub use render::{formatter_for, RecordFormatter, RenderError};

/// Maximum number of rows a history query returns.
pub const PAGE_SIZE: i64 = 100;

pub const NO_DATA_MESSAGE: &str = "No historical data found for the given criteria.";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl HistoryError {
    /// True when the store could not be reached. Only this failure makes the
    /// `history` command exit with an error status.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, HistoryError::Store(e) if e.is_connection_failure())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOutcome {
    Records { source: Source, records: Vec<HistoryRecord> },
    NoData,
}

pub struct HistoryEngine {
    connector: Arc<dyn StoreConnector>,
}

impl HistoryEngine {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }

    /// Runs a request and returns the newest matching rows, newest first.
    ///
    /// Validation happens before the store is contacted.
    pub async fn query(&self, request: &HistoryRequest) -> Result<HistoryOutcome, HistoryError> {
        let plan = QueryPlan::from_request(request, PAGE_SIZE)?;
        debug!(source = ?plan.source, predicates = plan.predicates.len(), "Planned history query");

        let mut connection = self.connector.connect().await?;
        let fetched = connection.fetch(&plan).await;
        connection.close().await;

        let records = fetched?;
        if records.is_empty() {
            Ok(HistoryOutcome::NoData)
        } else {
            Ok(HistoryOutcome::Records {
                source: plan.source,
                records,
            })
        }
    }

    /// Runs a request and writes the rendered result to `out`.
    pub async fn run(&self, request: &HistoryRequest, out: &mut dyn Write) -> Result<HistoryOutcome, HistoryError> {
        let outcome = self.query(request).await?;
        match &outcome {
            HistoryOutcome::Records { source, records } => {
                let rendered = formatter_for(request.output_format).format_records(*source, records)?;
                out.write_all(rendered.as_bytes())?;
                if !rendered.ends_with('\n') {
                    writeln!(out)?;
                }
            }
            HistoryOutcome::NoData => writeln!(out, "{}", NO_DATA_MESSAGE)?,
        }
        Ok(outcome)
    }
}
