//! Logging and observability
//!
//! Structured logging with:
//! - Configurable log levels
//! - Console output
//! - JSON file logging with rotation
//!
//! # Example
//!
//! ```no_run
//! use aggregator::logging::init_logging;
//! use aggregator::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Aggregator started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a batch claimed by a worker
///
/// # Example
///
/// ```no_run
/// use aggregator::log_batch_claimed;
/// use aggregator::domain::{BatchId, JobId, WorkerId};
///
/// let worker = WorkerId::generate();
/// log_batch_claimed!(&worker, &BatchId::generate(), &JobId::generate(), 0, 100);
/// ```
#[macro_export]
macro_rules! log_batch_claimed {
    ($worker:expr, $batch_id:expr, $job_id:expr, $cursor:expr, $patients:expr) => {
        tracing::info!(
            worker_id = %$worker,
            batch_id = %$batch_id,
            job_id = %$job_id,
            patient_cursor = $cursor,
            patients = $patients,
            "Batch claimed"
        );
    };
}

/// Log the per-patient result line
///
/// One line per processed patient, carrying the fields operators aggregate on.
/// `fail_reason` is `"NA"` when data was retrieved.
///
/// # Example
///
/// ```no_run
/// use aggregator::log_patient_result;
/// use aggregator::domain::{BatchId, PatientId, WorkerId};
/// use std::time::Duration;
///
/// let patient = PatientId::new("1SQ3F00AA00").unwrap();
/// log_patient_result!(
///     &WorkerId::generate(),
///     &BatchId::generate(),
///     &patient,
///     true,
///     "NA",
///     3,
///     Duration::from_millis(40)
/// );
/// ```
#[macro_export]
macro_rules! log_patient_result {
    ($worker:expr, $batch_id:expr, $patient:expr, $data_retrieved:expr, $fail_reason:expr, $requested:expr, $duration:expr) => {
        tracing::info!(
            metric = "DataExportResult",
            worker_id = %$worker,
            batch_id = %$batch_id,
            patient_id = %$patient,
            data_retrieved = $data_retrieved,
            fail_reason = %$fail_reason,
            resources_requested = $requested,
            duration_ms = $duration.as_millis() as u64,
            "Patient processed"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use aggregator::log_error_with_context;
/// use aggregator::domain::AggregatorError;
///
/// let error = AggregatorError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
