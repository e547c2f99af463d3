//! Job queue abstraction
//!
//! This module defines the trait every queue backend implements. The queue is the
//! only state shared between aggregation engine instances, so every transition it
//! exposes is atomic with respect to concurrent callers.

use crate::domain::batch::{rollup_status, Batch, JobRequest, RollupStatus};
use crate::domain::file::OutputFile;
use crate::domain::ids::{BatchId, JobId, OrganizationId, WorkerId};
use crate::domain::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Durable store of export batches
///
/// Ownership rule: `complete_partial_batch`, `complete_batch`, `fail_batch` and
/// `pause_batch` succeed only for the worker currently holding the batch's lease
/// while it is `RUNNING`; anything else is a `QueueError::Conflict`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Creates the batches of a new job, all `QUEUED`
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or the batches cannot be stored.
    async fn create_job(&self, request: JobRequest) -> Result<JobId>;

    /// Atomically claims the next queued batch for `worker`
    ///
    /// Running batches whose lease has expired are returned to the queue first.
    /// Batches are picked by priority, then submission time. `Ok(None)` means there
    /// is nothing to do.
    async fn claim_batch(&self, worker: &WorkerId) -> Result<Option<Batch>>;

    /// Persists the advanced cursor and output files of a running batch
    ///
    /// The stored cursor never moves backwards, so repeating the call with the
    /// same batch has no further effect.
    async fn complete_partial_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()>;

    /// Marks a fully processed batch `COMPLETED`
    async fn complete_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()>;

    /// Marks a batch `FAILED`
    async fn fail_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()>;

    /// Returns a running batch to the queue, keeping its progress
    async fn pause_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()>;

    /// Fetches a single batch
    async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<Batch>>;

    /// All batches of a job, oldest first
    async fn get_job_batches(&self, job_id: &JobId) -> Result<Vec<Batch>>;

    /// Rolled-up job status, `None` for an unknown job
    async fn get_job_status(&self, job_id: &JobId) -> Result<Option<RollupStatus>> {
        let batches = self.get_job_batches(job_id).await?;
        Ok(rollup_status(batches.iter().map(|b| b.status)))
    }

    /// Looks up an output file by name for an organization
    async fn get_batch_file(
        &self,
        organization_id: &OrganizationId,
        file_name: &str,
    ) -> Result<Option<OutputFile>>;

    /// Number of queued batches
    async fn queue_size(&self) -> Result<u64>;

    /// Age of the oldest queued batch
    async fn queue_age(&self) -> Result<Option<Duration>>;

    /// Errors if `worker` holds a running batch that has stopped making progress
    async fn assert_healthy(&self, worker: &WorkerId) -> Result<()>;

    /// Backend name for logs
    fn queue_type(&self) -> &'static str;
}
