//! Domain models and types for the aggregator.
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`JobId`], [`BatchId`], [`WorkerId`], [`PatientId`], ...)
//! - **The batch state machine** ([`Batch`], [`BatchStatus`], [`JobRequest`])
//! - **Output file metadata** ([`OutputFile`])
//! - **Outcome entries** ([`OperationOutcome`], [`OutcomeReason`])
//! - **Error types** ([`AggregatorError`], [`QueueError`], [`SourceError`])
//! - **Result type alias** ([`Result`])
//!
//! # Example
//!
//! ```rust
//! use aggregator::domain::{JobRequest, OrganizationId, PatientId, ProviderId, ResourceType};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = JobRequest::new(
//!     OrganizationId::new("46ac7ad6-7487-4dd0-baa0-6e2c8cae76a0")?,
//!     ProviderId::new("1234329724")?,
//!     vec![PatientId::new("1SQ3F00AA00")?],
//!     vec![ResourceType::ExplanationOfBenefit],
//! );
//! assert!(request.validate().is_ok());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod errors;
pub mod file;
pub mod ids;
pub mod outcome;
pub mod resource_type;
pub mod result;

pub use batch::{rollup_status, Batch, BatchStatus, JobPriority, JobRequest, RollupStatus};
pub use errors::{AggregatorError, QueueError, SourceError};
pub use file::OutputFile;
pub use ids::{BatchId, JobId, OrganizationId, PatientId, ProviderId, WorkerId};
pub use outcome::{OperationOutcome, OutcomeReason};
pub use resource_type::ResourceType;
pub use result::Result;
