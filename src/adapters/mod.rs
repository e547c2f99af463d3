//! External system integrations for the aggregator.
//!
//! - [`queue`] - job queue abstraction, in-memory backend and factory
//! - [`postgresql`] - PostgreSQL queue backend
//! - [`source`] - upstream record, claims, consent and identity sources
//! - [`storage`] - output file storage
//!
//! # Design Pattern
//!
//! Adapters isolate external dependencies behind traits so the pipeline can run
//! against in-memory implementations in tests:
//!
//! ```rust
//! use aggregator::adapters::queue::{JobQueue, MemoryJobQueue};
//! use aggregator::config::QueueConfig;
//! use aggregator::domain::{JobRequest, OrganizationId, PatientId, ProviderId, ResourceType, WorkerId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = MemoryJobQueue::new(&QueueConfig::default());
//! let job_id = queue
//!     .create_job(JobRequest::new(
//!         OrganizationId::new("org-1")?,
//!         ProviderId::new("1234329724")?,
//!         vec![PatientId::new("1SQ3F00AA00")?],
//!         vec![ResourceType::Patient],
//!     ))
//!     .await?;
//!
//! let batch = queue.claim_batch(&WorkerId::generate()).await?.expect("queued batch");
//! assert_eq!(batch.job_id, job_id);
//! # Ok(())
//! # }
//! ```

pub mod postgresql;
pub mod queue;
pub mod source;
pub mod storage;
