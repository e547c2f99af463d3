//! Aggregation engine
//!
//! One long-lived polling loop per worker. Each iteration claims at most one batch
//! and processes it to completion or pause. Everything an iteration can throw,
//! errors and panics alike, is caught and logged so the loop keeps polling. The
//! heartbeat keeps beating while an iteration waits on a slow upstream.

use crate::adapters::queue::JobQueue;
use crate::config::EngineConfig;
use crate::core::engine::health::{EngineHealthCheck, Heartbeat};
use crate::core::processor::{BatchProcessor, ProcessResult};
use crate::domain::ids::WorkerId;
use crate::domain::Result;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Result of one poll iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was claimable
    Idle,
    /// A batch was claimed and processed
    Processed(ProcessResult),
    /// The processor failed; the batch was failed or left for lease reclaim
    BatchFailed,
}

/// Continuously claims and processes batches for one worker
pub struct AggregationEngine {
    worker: WorkerId,
    queue: Arc<dyn JobQueue + Send + Sync>,
    processor: BatchProcessor,
    heartbeat: Heartbeat,
    config: EngineConfig,
}

impl AggregationEngine {
    /// Create an engine with a fresh worker ID
    pub fn new(
        queue: Arc<dyn JobQueue + Send + Sync>,
        processor: BatchProcessor,
        config: EngineConfig,
    ) -> Self {
        let heartbeat = Heartbeat::new();
        Self {
            worker: WorkerId::generate(),
            queue,
            processor: processor.with_heartbeat(heartbeat.clone()),
            heartbeat,
            config,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker
    }

    /// Liveness probe bound to this engine's heartbeat
    pub fn health_check(&self) -> EngineHealthCheck {
        EngineHealthCheck::new(
            self.worker,
            self.heartbeat.clone(),
            Duration::from_secs(self.config.heartbeat_stale_secs),
            self.queue.clone(),
        )
    }

    /// Polls until `shutdown` turns true or its sender is dropped
    ///
    /// A batch in flight when shutdown is requested is paused by the processor
    /// before this returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.worker,
            queue = self.queue.queue_type(),
            polling_interval_ms = self.config.polling_interval_ms,
            "Aggregation engine started"
        );
        self.heartbeat.set_running(true);
        self.heartbeat.beat();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_delay()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::warn!(worker_id = %self.worker, "Shutdown channel closed");
                        break;
                    }
                    continue;
                }
            }

            self.heartbeat.beat();
            match self.poll_with_heartbeat(&shutdown).await {
                Ok(Ok(outcome)) => {
                    tracing::trace!(worker_id = %self.worker, outcome = ?outcome, "Poll finished");
                }
                Ok(Err(e)) => {
                    crate::log_error_with_context!(e, "Poll iteration failed");
                }
                Err(panic) => {
                    tracing::error!(
                        worker_id = %self.worker,
                        panic = %panic_message(panic.as_ref()),
                        "Poll iteration panicked"
                    );
                }
            }
        }

        self.heartbeat.set_running(false);
        tracing::info!(worker_id = %self.worker, "Aggregation engine stopped");
    }

    /// Claims and processes at most one batch
    ///
    /// # Errors
    ///
    /// Returns queue errors from the claim. Processor errors are handled here by
    /// failing the batch.
    pub async fn poll_once(&self, shutdown: &watch::Receiver<bool>) -> Result<PollOutcome> {
        let Some(mut batch) = self.queue.claim_batch(&self.worker).await? else {
            return Ok(PollOutcome::Idle);
        };

        crate::log_batch_claimed!(
            self.worker,
            batch.batch_id,
            batch.job_id,
            batch.patient_cursor,
            batch.patients.len()
        );

        match self.processor.process(&mut batch, &self.worker, shutdown).await {
            Ok(result) => Ok(PollOutcome::Processed(result)),
            Err(e) => {
                tracing::error!(
                    worker_id = %self.worker,
                    batch_id = %batch.batch_id,
                    patient_cursor = batch.patient_cursor,
                    error = %e,
                    "Batch processing failed"
                );
                if let Err(fail_err) = self.queue.fail_batch(&mut batch, &self.worker).await {
                    tracing::error!(
                        worker_id = %self.worker,
                        batch_id = %batch.batch_id,
                        error = %fail_err,
                        "Unable to mark batch failed, leaving it for lease reclaim"
                    );
                }
                Ok(PollOutcome::BatchFailed)
            }
        }
    }

    /// Runs one poll iteration, beating the heartbeat until it settles
    ///
    /// Liveness follows the loop, not upstream latency: a source that takes minutes
    /// to answer keeps the probe healthy. Stuck batches surface through
    /// [`EngineHealthCheck::check_queue`] instead.
    async fn poll_with_heartbeat(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> std::thread::Result<Result<PollOutcome>> {
        let iteration = AssertUnwindSafe(self.poll_once(shutdown)).catch_unwind();
        tokio::pin!(iteration);

        let mut beats = tokio::time::interval(self.beat_interval());
        beats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                result = &mut iteration => return result,
                _ = beats.tick() => self.heartbeat.beat(),
            }
        }
    }

    /// Half the staleness threshold, so a live loop is never reported stale
    fn beat_interval(&self) -> Duration {
        let stale_after = Duration::from_secs(self.config.heartbeat_stale_secs);
        (stale_after / 2).max(Duration::from_millis(10))
    }

    fn poll_delay(&self) -> Duration {
        let jitter = if self.config.polling_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.polling_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.polling_interval_ms + jitter)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
