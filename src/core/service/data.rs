//! Synchronous data retrieval
//!
//! Internal callers that need one patient's records right now submit a single-patient
//! job at interactive priority and wait for the engine to finish it. The result is
//! either every record of the requested types as one collection bundle, or, when
//! nothing but outcomes was written, one combined outcome.

use crate::adapters::queue::JobQueue;
use crate::adapters::storage::FileStore;
use crate::config::DataServiceConfig;
use crate::domain::batch::{Batch, BatchStatus, JobPriority, JobRequest};
use crate::domain::ids::{JobId, OrganizationId, PatientId, ProviderId};
use crate::domain::outcome::OperationOutcome;
use crate::domain::resource_type::ResourceType;
use crate::domain::{AggregatorError, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of a completed retrieval
#[derive(Debug, Clone, PartialEq)]
pub enum DataResult {
    /// `Bundle` of type `collection` holding every exported record
    Bundle(Value),
    /// Only outcomes were produced for the patient
    Outcome(OperationOutcome),
}

/// Submit-and-wait facade over the job queue
pub struct DataService {
    queue: Arc<dyn JobQueue + Send + Sync>,
    store: FileStore,
    config: DataServiceConfig,
}

impl DataService {
    pub fn new(
        queue: Arc<dyn JobQueue + Send + Sync>,
        store: FileStore,
        config: DataServiceConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
        }
    }

    /// Exports one patient's records and waits for the result
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::DataRetrieval` when a batch fails or the job does
    /// not finish within `job_timeout_seconds`.
    pub async fn retrieve(
        &self,
        organization_id: &OrganizationId,
        provider_id: &ProviderId,
        patient: &PatientId,
        resource_types: Vec<ResourceType>,
        since: Option<DateTime<Utc>>,
    ) -> Result<DataResult> {
        let mut request = JobRequest::new(
            organization_id.clone(),
            provider_id.clone(),
            vec![patient.clone()],
            resource_types.clone(),
        )
        .with_priority(JobPriority::Interactive);
        if let Some(since) = since {
            request = request.with_since(since);
        }

        let job_id = self.queue.create_job(request).await?;
        tracing::debug!(job_id = %job_id, patient_id = %patient, "Waiting for data retrieval job");

        let timeout = Duration::from_secs(self.config.job_timeout_seconds);
        let batches = match tokio::time::timeout(timeout, self.wait_for(&job_id, organization_id))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    job_id = %job_id,
                    timeout_secs = self.config.job_timeout_seconds,
                    "Data retrieval job timed out"
                );
                return Err(AggregatorError::DataRetrieval(
                    "Failed to retrieve data".to_string(),
                ));
            }
        };

        self.assemble(&batches, &resource_types).await
    }

    /// Polls until every batch of the job is completed
    async fn wait_for(&self, job_id: &JobId, organization_id: &OrganizationId) -> Result<Vec<Batch>> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            let batches: Vec<Batch> = self
                .queue
                .get_job_batches(job_id)
                .await?
                .into_iter()
                .filter(|b| b.is_valid_for(organization_id))
                .collect();

            if let Some(failed) = batches.iter().find(|b| b.status == BatchStatus::Failed) {
                return Err(AggregatorError::DataRetrieval(format!(
                    "Failed to retrieve batch {}",
                    failed.batch_id
                )));
            }
            if !batches.is_empty() && batches.iter().all(|b| b.status == BatchStatus::Completed) {
                return Ok(batches);
            }

            tokio::time::sleep(interval).await;
        }
    }

    async fn assemble(&self, batches: &[Batch], resource_types: &[ResourceType]) -> Result<DataResult> {
        let files: Vec<_> = batches.iter().flat_map(|b| b.files.iter()).collect();

        if !files.is_empty() && files.iter().all(|f| f.resource_type.is_outcome()) {
            let mut outcomes = Vec::new();
            for file in files {
                for line in self.store.read_lines(file).await? {
                    outcomes.push(serde_json::from_str::<OperationOutcome>(&line)?);
                }
            }
            return Ok(DataResult::Outcome(OperationOutcome::combine(outcomes)));
        }

        let mut entries = Vec::new();
        for resource_type in resource_types {
            let mut typed: Vec<_> = files
                .iter()
                .filter(|f| f.resource_type == *resource_type)
                .collect();
            typed.sort_by_key(|f| f.sequence);
            for file in typed {
                entries.extend(
                    self.store
                        .read_resources(file)
                        .await?
                        .into_iter()
                        .map(|resource| json!({ "resource": resource })),
                );
            }
        }

        Ok(DataResult::Bundle(json!({
            "resourceType": "Bundle",
            "id": Uuid::new_v4().to_string(),
            "type": "collection",
            "total": entries.len(),
            "entry": entries,
        })))
    }
}
