//! Core pipeline logic for the aggregator.
//!
//! # Modules
//!
//! - [`eligibility`] - per-patient suppression and look-back gating
//! - [`processor`] - the per-patient loop over a claimed batch
//! - [`engine`] - the polling worker loop and its liveness probe
//! - [`service`] - submit-and-wait data retrieval
//!
//! # Pipeline
//!
//! 1. **Enqueue**: a caller creates a job; the queue splits it into batches
//! 2. **Claim**: an engine atomically claims the next batch by priority
//! 3. **Gate**: each patient passes suppression and look-back, or gets an outcome
//! 4. **Fetch and write**: records are appended to per-type NDJSON files
//! 5. **Checkpoint**: the cursor is persisted after every patient
//! 6. **Settle**: the batch is completed, failed, or paused on shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use aggregator::adapters::queue::MemoryJobQueue;
//! use aggregator::adapters::source::MockSource;
//! use aggregator::adapters::storage::FileStore;
//! use aggregator::config::{EngineConfig, QueueConfig};
//! use aggregator::core::eligibility::EligibilityGate;
//! use aggregator::core::engine::AggregationEngine;
//! use aggregator::core::processor::{BatchProcessor, ResourceWriter};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
//! let processor = BatchProcessor::new(
//!     queue.clone(),
//!     Arc::new(MockSource::new()),
//!     Arc::new(EligibilityGate::permissive()),
//!     ResourceWriter::new(FileStore::new("/tmp/aggregator/export"), 10_000),
//! );
//! let engine = AggregationEngine::new(queue, processor, EngineConfig::default());
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! engine.run(shutdown_rx).await;
//! # }
//! ```

pub mod eligibility;
pub mod engine;
pub mod processor;
pub mod service;
