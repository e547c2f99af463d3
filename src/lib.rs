// Aggregator - Clinical Records Export Pipeline
// Copyright (c) 2025 Aggregator Contributors
// Licensed under the MIT License

//! # Aggregator - Clinical Records Export Pipeline
//!
//! Aggregator exports clinical and claims records for large patient lists. Export
//! requests are split into batches held in a durable queue, and any number of
//! workers claim batches, gate each patient, and append the records to
//! newline-delimited JSON files.
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Queueing** export jobs as prioritized batches with lease-based ownership
//! - **Gating** patients on consent opt-outs and the claims look-back rule
//! - **Writing** records to per-type NDJSON files with rollover and checksums
//! - **Resuming** interrupted batches from a per-patient cursor
//!
//! ## Architecture
//!
//! Aggregator follows a layered architecture:
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Business logic (eligibility, processor, engine, data service)
//! - [`adapters`] - External integrations (queue backends, record source, file storage)
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aggregator::adapters::queue::create_job_queue;
//! use aggregator::config::load_config;
//! use aggregator::domain::{JobRequest, OrganizationId, PatientId, ProviderId, ResourceType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("aggregator.toml")?;
//!     let queue = create_job_queue(&config).await?;
//!
//!     let job_id = queue
//!         .create_job(JobRequest::new(
//!             OrganizationId::new("46ac7ad6-7487-4dd0-baa0-6e2c8cae76a0")?,
//!             ProviderId::new("1234329724")?,
//!             vec![PatientId::new("1SQ3F00AA00")?, PatientId::new("1SQ3F00AA01")?],
//!             vec![ResourceType::Patient, ResourceType::ExplanationOfBenefit],
//!         ))
//!         .await?;
//!
//!     println!("Submitted job {job_id}");
//!     Ok(())
//! }
//! ```
//!
//! ## Resumability
//!
//! The processor persists the batch cursor and output file metadata after every
//! patient. A worker that dies mid-batch stops renewing its lease; once the lease
//! expires another worker reclaims the batch and continues at the cursor.
//!
//! ## Error Handling
//!
//! Aggregator uses the [`domain::AggregatorError`] type for all errors:
//!
//! ```rust,no_run
//! use aggregator::domain::AggregatorError;
//!
//! fn example() -> Result<(), AggregatorError> {
//!     let config = aggregator::config::load_config("aggregator.toml")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Aggregator uses structured logging with the `tracing` crate. Every processed
//! patient emits one `DataExportResult` event:
//!
//! ```rust,no_run
//! use tracing::{info, warn};
//!
//! info!(batch_id = "b-1", "Batch completed");
//! warn!(patient_id = "1SQ3F00AA00", "Patient excluded");
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
