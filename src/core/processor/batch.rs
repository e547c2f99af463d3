//! Batch processor
//!
//! Works through a claimed batch one patient at a time, starting at the persisted
//! cursor:
//! 1. Gate the patient (suppression, then look-back)
//! 2. Fetch each requested resource type for an included patient
//! 3. Append records to the per-type files and errors to the outcome file
//! 4. Persist the advanced cursor with `complete_partial_batch`
//!
//! Output files are sealed with their checksums before the batch completes.
//!
//! Per-record failures become outcome entries. Queue, storage and serialization
//! errors abort the batch and are returned to the engine.

use crate::adapters::queue::JobQueue;
use crate::adapters::source::RecordSource;
use crate::core::eligibility::{EligibilityGate, GateDecision};
use crate::core::engine::health::Heartbeat;
use crate::core::processor::writer::ResourceWriter;
use crate::domain::batch::Batch;
use crate::domain::ids::{PatientId, WorkerId};
use crate::domain::outcome::OperationOutcome;
use crate::domain::{AggregatorError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// How processing of a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Every patient was processed and the batch is `COMPLETED`
    Completed,
    /// Shutdown was requested; the batch is back in the queue
    Paused,
}

/// Counters for one call to [`BatchProcessor::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub status: ProcessStatus,
    pub patients_processed: usize,
    pub records_written: usize,
    pub outcomes_written: usize,
}

impl ProcessResult {
    fn new() -> Self {
        Self {
            status: ProcessStatus::Completed,
            patients_processed: 0,
            records_written: 0,
            outcomes_written: 0,
        }
    }
}

/// What happened to a single patient
#[derive(Debug, Default)]
struct PatientResult {
    records_written: usize,
    outcomes_written: usize,
}

/// Processes claimed batches
#[derive(Clone)]
pub struct BatchProcessor {
    queue: Arc<dyn JobQueue + Send + Sync>,
    source: Arc<dyn RecordSource + Send + Sync>,
    gate: Arc<EligibilityGate>,
    writer: ResourceWriter,
    heartbeat: Heartbeat,
}

impl BatchProcessor {
    pub fn new(
        queue: Arc<dyn JobQueue + Send + Sync>,
        source: Arc<dyn RecordSource + Send + Sync>,
        gate: Arc<EligibilityGate>,
        writer: ResourceWriter,
    ) -> Self {
        Self {
            queue,
            source,
            gate,
            writer,
            heartbeat: Heartbeat::new(),
        }
    }

    /// Beats `heartbeat` once per processed patient
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Processes `batch` from its cursor to the end
    ///
    /// When `shutdown` turns true between patients the batch is paused and
    /// `ProcessStatus::Paused` is returned.
    ///
    /// # Errors
    ///
    /// Returns queue, storage and serialization errors. The batch is left as it was
    /// after the last persisted patient.
    pub async fn process(
        &self,
        batch: &mut Batch,
        worker: &WorkerId,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ProcessResult> {
        let mut result = ProcessResult::new();

        tracing::info!(
            batch_id = %batch.batch_id,
            job_id = %batch.job_id,
            patient_cursor = batch.patient_cursor,
            patients = batch.patients.len(),
            resource_types = ?batch.resource_types,
            "Processing batch"
        );

        while let Some(patient) = batch.next_patient().cloned() {
            if *shutdown.borrow() {
                tracing::info!(
                    batch_id = %batch.batch_id,
                    patient_cursor = batch.patient_cursor,
                    "Shutdown requested, pausing batch"
                );
                self.queue.pause_batch(batch, worker).await?;
                result.status = ProcessStatus::Paused;
                return Ok(result);
            }

            let patient_result = self.process_patient(batch, worker, &patient).await?;
            result.patients_processed += 1;
            result.records_written += patient_result.records_written;
            result.outcomes_written += patient_result.outcomes_written;

            batch.advance_cursor().map_err(AggregatorError::Validation)?;
            self.queue.complete_partial_batch(batch, worker).await?;
            self.heartbeat.beat();
        }

        self.writer.seal_all(batch).await?;
        self.queue.complete_batch(batch, worker).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            patients_processed = result.patients_processed,
            records_written = result.records_written,
            outcomes_written = result.outcomes_written,
            files = batch.files.len(),
            "Batch completed"
        );

        Ok(result)
    }

    async fn process_patient(
        &self,
        batch: &mut Batch,
        worker: &WorkerId,
        patient: &PatientId,
    ) -> Result<PatientResult> {
        let started = Instant::now();
        let mut result = PatientResult::default();

        let decision = self.gate.evaluate(batch, patient).await;
        if let Some(outcome) = decision.to_outcome(patient) {
            self.writer.write_outcome(batch, &outcome).await?;
            result.outcomes_written += 1;
        }

        if decision == GateDecision::Included {
            let resource_types = batch.resource_types.clone();
            for resource_type in resource_types {
                match self.source.fetch(patient, resource_type, batch.since).await {
                    Ok(records) => {
                        let records = filter_since(records, batch.since);
                        result.records_written +=
                            self.writer.write(batch, resource_type, &records).await?;
                    }
                    Err(e) => {
                        tracing::warn!(
                            batch_id = %batch.batch_id,
                            patient_id = %patient,
                            resource_type = %resource_type,
                            error = %e,
                            "Failed to fetch resources"
                        );
                        let outcome = OperationOutcome::from_source_error(&e, patient);
                        self.writer.write_outcome(batch, &outcome).await?;
                        result.outcomes_written += 1;
                    }
                }
            }
        }

        crate::log_patient_result!(
            worker,
            batch.batch_id,
            patient,
            decision == GateDecision::Included,
            decision.fail_reason(),
            batch.resource_types.len(),
            started.elapsed()
        );

        Ok(result)
    }
}

/// Drops records whose `meta.lastUpdated` is not after `since`
///
/// Records without a readable timestamp are kept.
fn filter_since(records: Vec<Value>, since: Option<DateTime<Utc>>) -> Vec<Value> {
    let Some(since) = since else {
        return records;
    };
    records
        .into_iter()
        .filter(|record| {
            record
                .pointer("/meta/lastUpdated")
                .and_then(Value::as_str)
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|updated| updated.with_timezone(&Utc) > since)
                .unwrap_or(true)
        })
        .collect()
}
