//! PostgreSQL integration
//!
//! Durable job queue shared by every worker process.

pub mod client;
pub mod models;
pub mod queue;

pub use client::PostgreSQLClient;
pub use models::{PostgreSQLBatch, PostgreSQLBatchFile};
pub use queue::PostgreSQLJobQueue;
