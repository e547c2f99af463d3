//! Batch model and state machine
//!
//! A `Batch` is the unit of claimable work: an ordered list of patients for one
//! organization/provider, the requested resource types, a persisted patient cursor
//! and the output files written so far.
//!
//! Status moves `Queued -> Running -> {Completed, Failed}`. A running batch goes
//! back to `Queued` only when its lease expires or its worker pauses it on shutdown;
//! in both cases the cursor and files are kept so work resumes where it stopped.

use crate::domain::errors::QueueError;
use crate::domain::file::OutputFile;
use crate::domain::ids::{BatchId, JobId, OrganizationId, PatientId, ProviderId, WorkerId};
use crate::domain::resource_type::ResourceType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "QUEUED",
            BatchStatus::Running => "RUNNING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }

    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(BatchStatus::Queued),
            "RUNNING" => Ok(BatchStatus::Running),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            other => Err(format!("Unknown batch status: {other}")),
        }
    }
}

/// Status of a whole job, rolled up from its batches
pub type RollupStatus = BatchStatus;

/// Derives the job status from the statuses of its batches
///
/// Returns `None` for an unknown job (no batches).
///
/// ```
/// use aggregator::domain::batch::{rollup_status, BatchStatus};
///
/// assert_eq!(
///     rollup_status([BatchStatus::Completed, BatchStatus::Completed]),
///     Some(BatchStatus::Completed)
/// );
/// assert_eq!(
///     rollup_status([BatchStatus::Completed, BatchStatus::Failed]),
///     Some(BatchStatus::Failed)
/// );
/// assert_eq!(
///     rollup_status([BatchStatus::Completed, BatchStatus::Queued]),
///     Some(BatchStatus::Running)
/// );
/// ```
pub fn rollup_status(statuses: impl IntoIterator<Item = BatchStatus>) -> Option<RollupStatus> {
    let statuses: Vec<BatchStatus> = statuses.into_iter().collect();
    if statuses.is_empty() {
        return None;
    }
    if statuses.iter().any(|s| *s == BatchStatus::Failed) {
        return Some(BatchStatus::Failed);
    }
    if statuses.iter().all(|s| *s == BatchStatus::Completed) {
        return Some(BatchStatus::Completed);
    }
    if statuses.iter().all(|s| *s == BatchStatus::Queued) {
        return Some(BatchStatus::Queued);
    }
    Some(BatchStatus::Running)
}

/// Scheduling priority. Lower numeric values are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Single-patient requests, usually someone waiting on the answer
    Interactive,
    /// Multi-patient bulk exports
    Bulk,
}

impl JobPriority {
    /// Numeric value stored on the batch
    pub fn value(&self) -> i32 {
        match self {
            JobPriority::Interactive => 1000,
            JobPriority::Bulk => 5000,
        }
    }

    /// Default priority for a request of the given size
    pub fn for_patient_count(count: usize) -> Self {
        if count == 1 {
            JobPriority::Interactive
        } else {
            JobPriority::Bulk
        }
    }
}

/// Everything needed to enqueue an export job
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub organization_id: OrganizationId,
    pub provider_id: ProviderId,
    pub patients: Vec<PatientId>,
    pub resource_types: Vec<ResourceType>,
    /// Only records updated after this instant are exported
    pub since: Option<DateTime<Utc>>,
    /// As-of time of the upstream data when the request was accepted
    pub transaction_time: DateTime<Utc>,
    /// Derived from the patient count when absent
    pub priority: Option<JobPriority>,
}

impl JobRequest {
    /// Creates a request with `transaction_time = now`, no `since` and a derived priority
    pub fn new(
        organization_id: OrganizationId,
        provider_id: ProviderId,
        patients: Vec<PatientId>,
        resource_types: Vec<ResourceType>,
    ) -> Self {
        Self {
            organization_id,
            provider_id,
            patients,
            resource_types,
            since: None,
            transaction_time: Utc::now(),
            priority: None,
        }
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Priority applied to every batch of the job
    pub fn effective_priority(&self) -> JobPriority {
        self.priority
            .unwrap_or_else(|| JobPriority::for_patient_count(self.patients.len()))
    }

    /// True when no data can be newer than `since`, so the job gets one empty batch
    pub fn is_empty_export(&self) -> bool {
        self.patients.is_empty()
            || self
                .since
                .map(|since| self.transaction_time <= since)
                .unwrap_or(false)
    }

    /// Validates the request before any batch is created
    pub fn validate(&self) -> Result<(), String> {
        if self.resource_types.is_empty() {
            return Err("At least one resource type must be requested".to_string());
        }
        if let Some(rt) = self.resource_types.iter().find(|rt| rt.is_outcome()) {
            return Err(format!("{rt} cannot be requested"));
        }
        Ok(())
    }

    /// Splits the request into batches of at most `batch_size` patients
    pub fn into_batches(self, job_id: JobId, batch_size: usize, now: DateTime<Utc>) -> Vec<Batch> {
        let priority = self.effective_priority().value();
        let chunks: Vec<Vec<PatientId>> = if self.is_empty_export() {
            vec![Vec::new()]
        } else {
            self.patients
                .chunks(batch_size.max(1))
                .map(|c| c.to_vec())
                .collect()
        };

        chunks
            .into_iter()
            .map(|patients| Batch {
                batch_id: BatchId::generate(),
                job_id,
                organization_id: self.organization_id.clone(),
                provider_id: self.provider_id.clone(),
                patients,
                resource_types: self.resource_types.clone(),
                since: self.since,
                transaction_time: self.transaction_time,
                priority,
                status: BatchStatus::Queued,
                aggregator_id: None,
                patient_cursor: 0,
                retry_count: 0,
                submit_time: now,
                start_time: None,
                update_time: now,
                complete_time: None,
                files: Vec::new(),
            })
            .collect()
    }
}

/// One claimable unit of export work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub job_id: JobId,
    pub organization_id: OrganizationId,
    pub provider_id: ProviderId,
    pub patients: Vec<PatientId>,
    pub resource_types: Vec<ResourceType>,
    pub since: Option<DateTime<Utc>>,
    pub transaction_time: DateTime<Utc>,
    pub priority: i32,
    pub status: BatchStatus,
    /// Worker currently holding the lease
    pub aggregator_id: Option<WorkerId>,
    /// Index of the next unprocessed patient
    pub patient_cursor: usize,
    /// Number of times an expired lease was reclaimed
    pub retry_count: u32,
    pub submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
    pub files: Vec<OutputFile>,
}

impl Batch {
    /// Next patient to process, or `None` once the cursor reaches the end
    pub fn next_patient(&self) -> Option<&PatientId> {
        self.patients.get(self.patient_cursor)
    }

    /// Moves the cursor past the current patient
    pub fn advance_cursor(&mut self) -> Result<(), String> {
        if self.patient_cursor >= self.patients.len() {
            return Err(format!(
                "Batch {} cursor {} is already at the end of {} patients",
                self.batch_id,
                self.patient_cursor,
                self.patients.len()
            ));
        }
        self.patient_cursor += 1;
        Ok(())
    }

    /// Errors unless `worker` holds the lease on a running batch
    pub fn assert_owned_by(&self, worker: &WorkerId) -> Result<(), QueueError> {
        if self.status != BatchStatus::Running {
            return Err(QueueError::conflict(
                self.batch_id,
                format!("batch is {}, not RUNNING", self.status),
            ));
        }
        match self.aggregator_id {
            Some(ref owner) if owner == worker => Ok(()),
            Some(ref owner) => Err(QueueError::conflict(
                self.batch_id,
                format!("lease held by worker {owner}, not {worker}"),
            )),
            None => Err(QueueError::conflict(self.batch_id, "batch has no lease holder")),
        }
    }

    /// Claims the batch for `worker`
    pub fn set_running(&mut self, worker: WorkerId, now: DateTime<Utc>) -> Result<(), QueueError> {
        if self.status != BatchStatus::Queued {
            return Err(QueueError::conflict(
                self.batch_id,
                format!("cannot claim a {} batch", self.status),
            ));
        }
        self.status = BatchStatus::Running;
        self.aggregator_id = Some(worker);
        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
        self.update_time = now;
        Ok(())
    }

    /// Persists progress from a worker's copy: the cursor only moves forward
    pub fn set_completed_partial(
        &mut self,
        worker: &WorkerId,
        progress: &Batch,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.assert_owned_by(worker)?;
        self.patient_cursor = self
            .patient_cursor
            .max(progress.patient_cursor)
            .min(self.patients.len());
        self.files = progress.files.clone();
        self.update_time = now;
        Ok(())
    }

    /// Terminal success
    pub fn set_completed(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.assert_owned_by(worker)?;
        if self.patient_cursor < self.patients.len() {
            return Err(QueueError::conflict(
                self.batch_id,
                format!(
                    "cannot complete with {} of {} patients processed",
                    self.patient_cursor,
                    self.patients.len()
                ),
            ));
        }
        self.status = BatchStatus::Completed;
        self.update_time = now;
        self.complete_time = Some(now);
        Ok(())
    }

    /// Terminal failure
    pub fn set_failed(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.assert_owned_by(worker)?;
        self.status = BatchStatus::Failed;
        self.update_time = now;
        self.complete_time = Some(now);
        Ok(())
    }

    /// Releases the lease without losing progress
    pub fn set_paused(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.assert_owned_by(worker)?;
        self.status = BatchStatus::Queued;
        self.aggregator_id = None;
        self.update_time = now;
        Ok(())
    }

    /// True when a running batch has not been touched within the lease
    pub fn is_lease_expired(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        self.status == BatchStatus::Running && self.update_time < now - lease
    }

    /// Returns an abandoned batch to the queue
    pub fn restart(&mut self, now: DateTime<Utc>) {
        self.status = BatchStatus::Queued;
        self.aggregator_id = None;
        self.retry_count += 1;
        self.update_time = now;
    }

    /// Highest-sequence file for a resource type
    pub fn latest_file(&self, resource_type: ResourceType) -> Option<&OutputFile> {
        self.files
            .iter()
            .filter(|f| f.resource_type == resource_type)
            .max_by_key(|f| f.sequence)
    }

    /// Mutable access to the highest-sequence file for a resource type
    pub fn latest_file_mut(&mut self, resource_type: ResourceType) -> Option<&mut OutputFile> {
        self.files
            .iter_mut()
            .filter(|f| f.resource_type == resource_type)
            .max_by_key(|f| f.sequence)
    }

    /// Starts a new file for `resource_type` after the current latest one
    pub fn add_file(&mut self, resource_type: ResourceType) -> &mut OutputFile {
        let sequence = self
            .latest_file(resource_type)
            .map(|f| f.sequence + 1)
            .unwrap_or(0);
        self.files.push(OutputFile::new(
            self.batch_id,
            self.job_id,
            resource_type,
            sequence,
        ));
        let last = self.files.len() - 1;
        &mut self.files[last]
    }

    /// Whether the batch belongs to the organization
    pub fn is_valid_for(&self, organization_id: &OrganizationId) -> bool {
        &self.organization_id == organization_id
    }

    /// Only outcome files were written
    pub fn has_only_outcome_files(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.resource_type.is_outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(patients: usize) -> JobRequest {
        JobRequest::new(
            OrganizationId::new("org-1").unwrap(),
            ProviderId::new("1234567890").unwrap(),
            (0..patients)
                .map(|i| PatientId::new(format!("patient-{i}")).unwrap())
                .collect(),
            vec![ResourceType::Patient],
        )
    }

    fn running_batch(worker: WorkerId) -> Batch {
        let mut batch = request(3)
            .into_batches(JobId::generate(), 10, Utc::now())
            .remove(0);
        batch.set_running(worker, Utc::now()).unwrap();
        batch
    }

    #[test]
    fn test_split_into_batches() {
        let batches = request(5).into_batches(JobId::generate(), 2, Utc::now());
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].patients.len(), 2);
        assert_eq!(batches[2].patients.len(), 1);
        assert!(batches.iter().all(|b| b.status == BatchStatus::Queued));
        assert!(batches.iter().all(|b| b.priority == 5000));
    }

    #[test]
    fn test_empty_patient_list_creates_one_empty_batch() {
        let batches = request(0).into_batches(JobId::generate(), 10, Utc::now());
        assert_eq!(batches.len(), 1);
        assert!(batches[0].patients.is_empty());
    }

    #[test]
    fn test_since_after_transaction_time_creates_empty_batch() {
        let req = request(4);
        let since = req.transaction_time + Duration::hours(1);
        let batches = req
            .with_since(since)
            .into_batches(JobId::generate(), 2, Utc::now());
        assert_eq!(batches.len(), 1);
        assert!(batches[0].patients.is_empty());
    }

    #[test]
    fn test_single_patient_is_interactive() {
        let batches = request(1).into_batches(JobId::generate(), 10, Utc::now());
        assert_eq!(batches[0].priority, JobPriority::Interactive.value());
    }

    #[test]
    fn test_validate_rejects_outcome_type() {
        let mut req = request(1);
        req.resource_types.push(ResourceType::OperationOutcome);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_cursor_is_bounded() {
        let mut batch = running_batch(WorkerId::generate());
        for _ in 0..3 {
            batch.advance_cursor().unwrap();
        }
        assert!(batch.next_patient().is_none());
        assert!(batch.advance_cursor().is_err());
        assert_eq!(batch.patient_cursor, 3);
    }

    #[test]
    fn test_owner_checks() {
        let worker = WorkerId::generate();
        let mut batch = running_batch(worker);
        let other = WorkerId::generate();
        assert!(batch.set_failed(&other, Utc::now()).is_err());
        assert!(batch.set_failed(&worker, Utc::now()).is_ok());
        // settled batches cannot transition again
        assert!(batch.set_failed(&worker, Utc::now()).is_err());
    }

    #[test]
    fn test_complete_requires_all_patients() {
        let worker = WorkerId::generate();
        let mut batch = running_batch(worker);
        assert!(batch.set_completed(&worker, Utc::now()).is_err());
        batch.patient_cursor = 3;
        assert!(batch.set_completed(&worker, Utc::now()).is_ok());
        assert_eq!(batch.status, BatchStatus::Completed);
        assert!(batch.complete_time.is_some());
    }

    #[test]
    fn test_partial_never_moves_cursor_backwards() {
        let worker = WorkerId::generate();
        let mut stored = running_batch(worker);
        stored.patient_cursor = 2;
        let mut stale = stored.clone();
        stale.patient_cursor = 1;
        stored
            .set_completed_partial(&worker, &stale, Utc::now())
            .unwrap();
        assert_eq!(stored.patient_cursor, 2);
    }

    #[test]
    fn test_lease_expiry_and_restart() {
        let worker = WorkerId::generate();
        let mut batch = running_batch(worker);
        batch.patient_cursor = 1;
        let later = batch.update_time + Duration::minutes(20);
        assert!(batch.is_lease_expired(Duration::minutes(15), later));
        batch.restart(later);
        assert_eq!(batch.status, BatchStatus::Queued);
        assert_eq!(batch.aggregator_id, None);
        assert_eq!(batch.retry_count, 1);
        assert_eq!(batch.patient_cursor, 1);
    }

    #[test]
    fn test_add_file_increments_sequence() {
        let mut batch = running_batch(WorkerId::generate());
        batch.add_file(ResourceType::Patient);
        batch.add_file(ResourceType::Patient);
        batch.add_file(ResourceType::OperationOutcome);
        assert_eq!(batch.latest_file(ResourceType::Patient).unwrap().sequence, 1);
        assert_eq!(
            batch
                .latest_file(ResourceType::OperationOutcome)
                .unwrap()
                .sequence,
            0
        );
        assert!(!batch.has_only_outcome_files());
    }

    #[test]
    fn test_rollup_empty_is_none() {
        assert_eq!(rollup_status(Vec::new()), None);
        assert_eq!(
            rollup_status([BatchStatus::Queued, BatchStatus::Queued]),
            Some(BatchStatus::Queued)
        );
    }
}
