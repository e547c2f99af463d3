//! Engine liveness
//!
//! The engine loop beats a shared [`Heartbeat`] between polls and on a timer
//! while a poll is in flight; the batch processor adds a beat per patient. The
//! [`EngineHealthCheck`] reports healthy while the loop runs and the last beat is
//! recent. Batch outcomes and upstream latency never affect the result.

use crate::adapters::queue::JobQueue;
use crate::domain::ids::WorkerId;
use crate::domain::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct HeartbeatState {
    running: AtomicBool,
    /// Milliseconds since the epoch, 0 before the first beat
    last_beat_ms: AtomicI64,
}

/// Shared liveness signal of one engine
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    state: Arc<HeartbeatState>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records progress now
    pub fn beat(&self) {
        self.state
            .last_beat_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.state.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        match self.state.last_beat_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Time since the last beat
    pub fn age(&self) -> Option<Duration> {
        self.last_beat()
            .and_then(|beat| (Utc::now() - beat).to_std().ok().or(Some(Duration::ZERO)))
    }
}

/// Result of a liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Liveness probe for one aggregation engine
pub struct EngineHealthCheck {
    worker: WorkerId,
    heartbeat: Heartbeat,
    stale_after: Duration,
    queue: Arc<dyn JobQueue + Send + Sync>,
}

impl EngineHealthCheck {
    pub fn new(
        worker: WorkerId,
        heartbeat: Heartbeat,
        stale_after: Duration,
        queue: Arc<dyn JobQueue + Send + Sync>,
    ) -> Self {
        Self {
            worker,
            heartbeat,
            stale_after,
            queue,
        }
    }

    /// Healthy while the loop is running and its heartbeat is fresh
    pub fn check(&self) -> HealthStatus {
        if !self.heartbeat.is_running() {
            return HealthStatus::Unhealthy(format!("engine {} is not running", self.worker));
        }
        match self.heartbeat.age() {
            None => HealthStatus::Unhealthy(format!("engine {} has not polled yet", self.worker)),
            Some(age) if age > self.stale_after => HealthStatus::Unhealthy(format!(
                "engine {} last polled {}s ago",
                self.worker,
                age.as_secs()
            )),
            Some(_) => HealthStatus::Healthy,
        }
    }

    /// Errors when this worker holds a batch that stopped making progress
    pub async fn check_queue(&self) -> Result<()> {
        self.queue.assert_healthy(&self.worker).await
    }
}
