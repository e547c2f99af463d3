//! PostgreSQL row models
//!
//! Mirrors of the `job_queue_batch` and `job_queue_batch_file` tables, with
//! conversions to and from the domain types.

use crate::domain::batch::{Batch, BatchStatus};
use crate::domain::file::OutputFile;
use crate::domain::ids::{BatchId, JobId, OrganizationId, PatientId, ProviderId, WorkerId};
use crate::domain::resource_type::ResourceType;
use crate::domain::{AggregatorError, Result};
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

/// Column list shared by every batch query
pub const BATCH_COLUMNS: &str = "batch_id, job_id, organization_id, provider_id, patients, \
     resource_types, since, transaction_time, status, priority, patient_cursor, retry_count, \
     aggregator_id, submit_time, start_time, update_time, complete_time";

/// Row of the `job_queue_batch` table
#[derive(Debug, Clone)]
pub struct PostgreSQLBatch {
    pub batch_id: Uuid,
    pub job_id: Uuid,
    pub organization_id: String,
    pub provider_id: String,
    pub patients: Vec<String>,
    pub resource_types: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub transaction_time: DateTime<Utc>,
    pub status: String,
    pub priority: i32,
    pub patient_cursor: i32,
    pub retry_count: i32,
    pub aggregator_id: Option<Uuid>,
    pub submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
}

impl PostgreSQLBatch {
    /// Reads a row selected with [`BATCH_COLUMNS`]
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            batch_id: try_get(row, "batch_id")?,
            job_id: try_get(row, "job_id")?,
            organization_id: try_get(row, "organization_id")?,
            provider_id: try_get(row, "provider_id")?,
            patients: try_get(row, "patients")?,
            resource_types: try_get(row, "resource_types")?,
            since: try_get(row, "since")?,
            transaction_time: try_get(row, "transaction_time")?,
            status: try_get(row, "status")?,
            priority: try_get(row, "priority")?,
            patient_cursor: try_get(row, "patient_cursor")?,
            retry_count: try_get(row, "retry_count")?,
            aggregator_id: try_get(row, "aggregator_id")?,
            submit_time: try_get(row, "submit_time")?,
            start_time: try_get(row, "start_time")?,
            update_time: try_get(row, "update_time")?,
            complete_time: try_get(row, "complete_time")?,
        })
    }

    /// Convert from a domain batch
    pub fn from_domain(batch: &Batch) -> Self {
        Self {
            batch_id: *batch.batch_id.as_uuid(),
            job_id: *batch.job_id.as_uuid(),
            organization_id: batch.organization_id.to_string(),
            provider_id: batch.provider_id.to_string(),
            patients: batch.patients.iter().map(|p| p.to_string()).collect(),
            resource_types: batch.resource_types.iter().map(|rt| rt.to_string()).collect(),
            since: batch.since,
            transaction_time: batch.transaction_time,
            status: batch.status.as_str().to_string(),
            priority: batch.priority,
            patient_cursor: batch.patient_cursor as i32,
            retry_count: batch.retry_count as i32,
            aggregator_id: batch.aggregator_id.map(|w| *w.as_uuid()),
            submit_time: batch.submit_time,
            start_time: batch.start_time,
            update_time: batch.update_time,
            complete_time: batch.complete_time,
        }
    }

    /// Convert to a domain batch with the given files
    pub fn to_domain(&self, files: Vec<OutputFile>) -> Result<Batch> {
        let patients = self
            .patients
            .iter()
            .map(PatientId::new)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(AggregatorError::Validation)?;
        let resource_types = self
            .resource_types
            .iter()
            .map(|rt| rt.parse::<ResourceType>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(AggregatorError::Validation)?;

        Ok(Batch {
            batch_id: BatchId::from_uuid(self.batch_id),
            job_id: JobId::from_uuid(self.job_id),
            organization_id: OrganizationId::new(&self.organization_id)
                .map_err(AggregatorError::Validation)?,
            provider_id: ProviderId::new(&self.provider_id).map_err(AggregatorError::Validation)?,
            patients,
            resource_types,
            since: self.since,
            transaction_time: self.transaction_time,
            priority: self.priority,
            status: self
                .status
                .parse::<BatchStatus>()
                .map_err(AggregatorError::Validation)?,
            aggregator_id: self.aggregator_id.map(WorkerId::from_uuid),
            patient_cursor: self.patient_cursor.max(0) as usize,
            retry_count: self.retry_count.max(0) as u32,
            submit_time: self.submit_time,
            start_time: self.start_time,
            update_time: self.update_time,
            complete_time: self.complete_time,
            files,
        })
    }
}

/// Row of the `job_queue_batch_file` table
#[derive(Debug, Clone)]
pub struct PostgreSQLBatchFile {
    pub batch_id: Uuid,
    pub job_id: Uuid,
    pub resource_type: String,
    pub sequence: i32,
    pub file_name: String,
    pub count: i32,
    pub checksum: Vec<u8>,
    pub file_length: i64,
}

impl PostgreSQLBatchFile {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            batch_id: try_get(row, "batch_id")?,
            job_id: try_get(row, "job_id")?,
            resource_type: try_get(row, "resource_type")?,
            sequence: try_get(row, "sequence")?,
            file_name: try_get(row, "file_name")?,
            count: try_get(row, "count")?,
            checksum: try_get(row, "checksum")?,
            file_length: try_get(row, "file_length")?,
        })
    }

    pub fn from_domain(file: &OutputFile) -> Self {
        Self {
            batch_id: *file.batch_id.as_uuid(),
            job_id: *file.job_id.as_uuid(),
            resource_type: file.resource_type.to_string(),
            sequence: file.sequence as i32,
            file_name: file.file_name.clone(),
            count: file.count as i32,
            checksum: file.checksum.clone(),
            file_length: file.file_length as i64,
        }
    }

    pub fn to_domain(&self) -> Result<OutputFile> {
        Ok(OutputFile {
            batch_id: BatchId::from_uuid(self.batch_id),
            job_id: JobId::from_uuid(self.job_id),
            resource_type: self
                .resource_type
                .parse()
                .map_err(AggregatorError::Validation)?,
            sequence: self.sequence.max(0) as u32,
            file_name: self.file_name.clone(),
            count: self.count.max(0) as u32,
            checksum: self.checksum.clone(),
            file_length: self.file_length.max(0) as u64,
        })
    }
}

fn try_get<'a, T>(row: &'a Row, column: &str) -> Result<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(column).map_err(|e| {
        AggregatorError::Database(format!("Failed to read column '{column}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::JobRequest;

    fn batch() -> Batch {
        let mut batch = JobRequest::new(
            OrganizationId::new("org-1").unwrap(),
            ProviderId::new("1234567890").unwrap(),
            vec![
                PatientId::new("p-1").unwrap(),
                PatientId::new("p-2").unwrap(),
            ],
            vec![ResourceType::Patient, ResourceType::Coverage],
        )
        .into_batches(JobId::generate(), 10, Utc::now())
        .remove(0);
        batch.set_running(WorkerId::generate(), Utc::now()).unwrap();
        batch.patient_cursor = 1;
        batch
    }

    #[test]
    fn test_batch_conversion_preserves_state() {
        let batch = batch();
        let row = PostgreSQLBatch::from_domain(&batch);
        assert_eq!(row.status, "RUNNING");
        assert_eq!(row.resource_types, vec!["Patient", "Coverage"]);

        let restored = row.to_domain(Vec::new()).unwrap();
        assert_eq!(restored, batch);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let mut row = PostgreSQLBatch::from_domain(&batch());
        row.status = "PAUSED".to_string();
        assert!(row.to_domain(Vec::new()).is_err());
    }

    #[test]
    fn test_file_conversion() {
        let mut batch = batch();
        let file = batch.add_file(ResourceType::Coverage);
        file.count = 3;
        file.checksum = vec![1, 2, 3];
        file.file_length = 120;
        let file = file.clone();

        let row = PostgreSQLBatchFile::from_domain(&file);
        assert_eq!(row.resource_type, "Coverage");
        assert_eq!(row.to_domain().unwrap(), file);
    }
}
