//! The persistence gateway: a time-series store of process and GPU samples.

#[cfg(feature = "test-utils")]
pub mod memory;
pub mod postgres;

use crate::core::{GpuSample, ProcessSample};
use crate::history::{HistoryRecord, QueryPlan};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

pub use postgres::PostgresConnector;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Could not connect to the database: {0}")]
    Connection(String),

    #[error("Failed to write samples: {0}")]
    Write(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Schema setup failed: {0}")]
    Schema(String),

    #[error("Could not connect to the database after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Connection attempts cancelled due to shutdown")]
    Shutdown,
}

impl StoreError {
    /// True when the error means the store could not be reached at all.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Exhausted { .. })
    }
}

/// Opens sessions to a store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// A description of the endpoint safe for logs (no credentials).
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;
}

/// A live session with the store.
///
/// Each insert call writes its whole batch atomically: either every sample of
/// the batch is stored or none is.
#[async_trait]
pub trait StoreConnection: Send {
    /// Creates the raw sample tables if missing. Safe to run repeatedly and
    /// from concurrent invocations.
    async fn ensure_schema(&mut self) -> Result<(), StoreError>;

    /// Stores a process batch, stamped with the store's current time.
    async fn insert_processes(&mut self, samples: &[ProcessSample]) -> Result<u64, StoreError>;

    /// Stores a GPU batch, stamped with the store's current time.
    async fn insert_gpus(&mut self, samples: &[GpuSample]) -> Result<u64, StoreError>;

    async fn fetch(&mut self, plan: &QueryPlan) -> Result<Vec<HistoryRecord>, StoreError>;

    async fn close(self: Box<Self>);
}

/// Bounded, fixed-delay retry of store connection attempts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetryPolicy {
    /// Total connection attempts before giving up.
    pub max_attempts: u32,
    /// Pause between attempts in seconds.
    pub delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_seconds: 5,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// Connects to the store, retrying per `policy`.
///
/// Returns `StoreError::Exhausted` once every attempt failed and
/// `StoreError::Shutdown` if shutdown is signalled while waiting between
/// attempts.
pub async fn connect_with_retry(
    connector: &dyn StoreConnector,
    policy: &RetryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Box<dyn StoreConnection>, StoreError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if *shutdown_rx.borrow() {
            return Err(StoreError::Shutdown);
        }
        match connector.connect().await {
            Ok(connection) => {
                if attempt > 1 {
                    info!(attempt, endpoint = %connector.endpoint(), "Connected to the database");
                }
                return Ok(connection);
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    endpoint = %connector.endpoint(),
                    error = %e,
                    "Database connection attempt failed"
                );
                last_error = e.to_string();
            }
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => return Err(StoreError::Shutdown),
                _ = sleep(policy.delay()) => {}
            }
        }
    }

    Err(StoreError::Exhausted {
        attempts,
        last: last_error,
    })
}
