//! In-memory job queue
//!
//! All batches live behind one async mutex, which makes every claim and transition
//! atomic for the tasks of a single process. Used by tests and single-process runs;
//! multi-process deployments use the PostgreSQL queue.

use crate::adapters::queue::traits::JobQueue;
use crate::config::QueueConfig;
use crate::domain::batch::{Batch, BatchStatus, JobRequest};
use crate::domain::errors::QueueError;
use crate::domain::file::OutputFile;
use crate::domain::ids::{BatchId, JobId, OrganizationId, WorkerId};
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Job queue held in process memory
pub struct MemoryJobQueue {
    batches: Mutex<HashMap<BatchId, Batch>>,
    batch_size: usize,
    lease: ChronoDuration,
    stale_after: ChronoDuration,
}

impl MemoryJobQueue {
    /// Create a new in-memory queue from the queue settings
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            batch_size: config.batch_size,
            lease: ChronoDuration::minutes(config.lease_minutes as i64),
            stale_after: ChronoDuration::minutes(config.stale_minutes as i64),
        }
    }

    /// Overrides the lease duration
    pub fn with_lease(mut self, lease: ChronoDuration) -> Self {
        self.lease = lease;
        self
    }

    /// Applies `update` to the stored copy of `batch` and refreshes the caller's copy
    async fn transition<F>(&self, batch: &mut Batch, update: F) -> Result<()>
    where
        F: FnOnce(&mut Batch) -> std::result::Result<(), QueueError> + Send,
    {
        let mut batches = self.batches.lock().await;
        let stored = batches
            .get_mut(&batch.batch_id)
            .ok_or(QueueError::BatchNotFound(batch.batch_id))?;
        update(stored)?;
        *batch = stored.clone();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn create_job(&self, request: JobRequest) -> Result<JobId> {
        request.validate().map_err(QueueError::JobCreation)?;

        let job_id = JobId::generate();
        let batches = request.into_batches(job_id, self.batch_size, Utc::now());

        let mut stored = self.batches.lock().await;
        for batch in batches {
            stored.insert(batch.batch_id, batch);
        }

        tracing::debug!(job_id = %job_id, "Job created");
        Ok(job_id)
    }

    async fn claim_batch(&self, worker: &WorkerId) -> Result<Option<Batch>> {
        let now = Utc::now();
        let mut batches = self.batches.lock().await;

        for batch in batches.values_mut() {
            if batch.is_lease_expired(self.lease, now) {
                tracing::warn!(
                    batch_id = %batch.batch_id,
                    previous_worker = ?batch.aggregator_id,
                    patient_cursor = batch.patient_cursor,
                    "Restarting batch with expired lease"
                );
                batch.restart(now);
            }
        }

        let next = batches
            .values()
            .filter(|b| b.status == BatchStatus::Queued)
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.submit_time.cmp(&b.submit_time))
            })
            .map(|b| b.batch_id);

        let Some(batch_id) = next else {
            return Ok(None);
        };

        let batch = batches
            .get_mut(&batch_id)
            .ok_or(QueueError::BatchNotFound(batch_id))?;
        batch.set_running(*worker, now)?;
        Ok(Some(batch.clone()))
    }

    async fn complete_partial_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        let progress = batch.clone();
        self.transition(batch, |stored| {
            stored.set_completed_partial(worker, &progress, Utc::now())
        })
        .await
    }

    async fn complete_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        let progress = batch.clone();
        self.transition(batch, |stored| {
            let now = Utc::now();
            stored.set_completed_partial(worker, &progress, now)?;
            stored.set_completed(worker, now)
        })
        .await
    }

    async fn fail_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        self.transition(batch, |stored| stored.set_failed(worker, Utc::now()))
            .await
    }

    async fn pause_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        let progress = batch.clone();
        self.transition(batch, |stored| {
            let now = Utc::now();
            stored.set_completed_partial(worker, &progress, now)?;
            stored.set_paused(worker, now)
        })
        .await
    }

    async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<Batch>> {
        Ok(self.batches.lock().await.get(batch_id).cloned())
    }

    async fn get_job_batches(&self, job_id: &JobId) -> Result<Vec<Batch>> {
        let batches = self.batches.lock().await;
        let mut found: Vec<Batch> = batches
            .values()
            .filter(|b| &b.job_id == job_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.submit_time.cmp(&b.submit_time));
        Ok(found)
    }

    async fn get_batch_file(
        &self,
        organization_id: &OrganizationId,
        file_name: &str,
    ) -> Result<Option<OutputFile>> {
        let batches = self.batches.lock().await;
        Ok(batches
            .values()
            .filter(|b| b.is_valid_for(organization_id))
            .flat_map(|b| b.files.iter())
            .find(|f| f.file_name == file_name)
            .cloned())
    }

    async fn queue_size(&self) -> Result<u64> {
        let batches = self.batches.lock().await;
        Ok(batches
            .values()
            .filter(|b| b.status == BatchStatus::Queued)
            .count() as u64)
    }

    async fn queue_age(&self) -> Result<Option<Duration>> {
        let now = Utc::now();
        let batches = self.batches.lock().await;
        Ok(batches
            .values()
            .filter(|b| b.status == BatchStatus::Queued)
            .map(|b| b.submit_time)
            .min()
            .and_then(|oldest| (now - oldest).to_std().ok()))
    }

    async fn assert_healthy(&self, worker: &WorkerId) -> Result<()> {
        let now = Utc::now();
        let batches = self.batches.lock().await;
        let stuck = batches.values().find(|b| {
            b.status == BatchStatus::Running
                && b.aggregator_id.as_ref() == Some(worker)
                && b.update_time < now - self.stale_after
        });

        match stuck {
            Some(batch) => Err(QueueError::Unhealthy(format!(
                "worker {} has batch {} stuck since {}",
                worker, batch.batch_id, batch.update_time
            ))
            .into()),
            None => Ok(()),
        }
    }

    fn queue_type(&self) -> &'static str {
        "memory"
    }
}
