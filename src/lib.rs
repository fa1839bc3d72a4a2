//! procmon - process and GPU telemetry collector and viewer
//!
//! Samples per-process CPU, memory and I/O plus NVIDIA GPU metrics, stores
//! them in PostgreSQL, and serves them back as a live dashboard or as
//! historical queries.

pub mod app;
pub mod cli;
pub mod collector;
pub mod config;
pub mod core;
pub mod history;
pub mod internal_metrics;
pub mod live;
pub mod sampling;
pub mod store;
pub mod task_manager;

// Re-export core types for convenience
pub use core::*;
