//! Aggregation engine and its liveness probe
//!
//! - [`aggregation`] - the polling loop that claims and processes batches
//! - [`health`] - heartbeat and [`EngineHealthCheck`]

pub mod aggregation;
pub mod health;

pub use aggregation::{AggregationEngine, PollOutcome};
pub use health::{EngineHealthCheck, HealthStatus, Heartbeat};
