//! Configuration management for the aggregator.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! The aggregator reads a TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - Default values for every optional setting
//! - `AGGREGATOR_<SECTION>_<KEY>` overrides
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aggregator::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("aggregator.toml")?;
//!
//! println!("Source: {}", config.source.base_url);
//! println!("Batch size: {}", config.queue.batch_size);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level
//! - [`QueueConfig`] - Queue backend, batch size and lease settings
//! - [`PostgreSQLConfig`] - Connection pool for the durable queue
//! - [`EngineConfig`] - Worker count, polling and liveness
//! - [`OperationsConfig`] - Output files and eligibility rules
//! - [`SourceConfig`] - Upstream record, claims and consent APIs
//! - [`DataServiceConfig`] - Synchronous data retrieval
//! - [`LoggingConfig`] - Local log files
//!
//! # Example Configuration
//!
//! ```toml
//! [queue]
//! backend = "postgresql"
//! batch_size = 100
//!
//! [postgresql]
//! connection_string = "${AGGREGATOR_PG_URL}"
//!
//! [source]
//! base_url = "https://sandbox.example.com/v2/fhir"
//! username = "aggregator"
//! password = "${AGGREGATOR_SOURCE_PASSWORD}"
//!
//! [operations]
//! export_path = "/var/lib/aggregator/export"
//! look_back_months = 18
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::load_config;
pub use schema::{
    AggregatorConfig, ApplicationConfig, DataServiceConfig, EngineConfig, LoggingConfig,
    OperationsConfig, PostgreSQLConfig, QueueBackend, QueueConfig, RetryConfig, SourceConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
