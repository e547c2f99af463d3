//! Domain error types
//!
//! This module defines the error hierarchy for the aggregator. Third-party error
//! types (HTTP client, database driver) are converted to strings at the adapter
//! boundary so they never leak through the domain API.

use crate::domain::ids::BatchId;
use crate::domain::resource_type::ResourceType;
use thiserror::Error;

/// Main aggregator error type
///
/// This is the primary error type used throughout the application.
/// It wraps the queue and source error families and provides the systemic
/// categories the worker loop has to survive.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue ownership and lookup errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Upstream source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Database-related errors (connection, statement, pool)
    #[error("Database error: {0}")]
    Database(String),

    /// Output file storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Synchronous data retrieval failures
    #[error("Data retrieval error: {0}")]
    DataRetrieval(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl AggregatorError {
    /// Whether the error came from the queue's ownership rules rather than the datastore
    pub fn is_conflict(&self) -> bool {
        matches!(self, AggregatorError::Queue(QueueError::Conflict { .. }))
    }
}

/// Queue-specific errors
///
/// Raised when a batch transition is attempted by a worker that does not hold
/// the lease, or when the batch does not exist.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The batch is owned by another worker or has already settled
    #[error("Batch {batch_id} conflict: {reason}")]
    Conflict { batch_id: BatchId, reason: String },

    /// Batch not found
    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// A job could not be created
    #[error("Unable to create job: {0}")]
    JobCreation(String),

    /// A worker holds a batch that stopped making progress
    #[error("Queue unhealthy: {0}")]
    Unhealthy(String),
}

impl QueueError {
    /// Creates a conflict error for the given batch
    pub fn conflict(batch_id: BatchId, reason: impl Into<String>) -> Self {
        QueueError::Conflict {
            batch_id,
            reason: reason.into(),
        }
    }
}

/// Upstream source errors
///
/// Errors returned by the record, claims, consent and identity sources. These are
/// per-record failures and are recorded as outcome entries by the batch processor.
#[derive(Debug, Error, Clone)]
pub enum SourceError {
    /// The source has no data of this type for the patient
    #[error("{resource_type} resource not found for patient {patient_id}")]
    NotFound {
        resource_type: ResourceType,
        patient_id: String,
    },

    /// Server error (non-success HTTP status)
    #[error("Error fetching {resource_type} resource. HTTP return code: {status}")]
    Server {
        resource_type: ResourceType,
        status: u16,
    },

    /// Failed to reach the source
    #[error("Failed to connect to source: {0}")]
    Connection(String),

    /// Response did not have the expected shape
    #[error("Invalid response from source: {0}")]
    InvalidResponse(String),

    /// Request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),
}

// Conversion from std::io::Error
impl From<std::io::Error> for AggregatorError {
    fn from(err: std::io::Error) -> Self {
        AggregatorError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for AggregatorError {
    fn from(err: serde_json::Error) -> Self {
        AggregatorError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for AggregatorError {
    fn from(err: toml::de::Error) -> Self {
        AggregatorError::Configuration(format!("TOML parse error: {err}"))
    }
}
