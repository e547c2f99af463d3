//! PostgreSQL job queue
//!
//! Batch rows live in `job_queue_batch`, output file metadata in
//! `job_queue_batch_file`. Claims use `FOR UPDATE SKIP LOCKED`, so any number of
//! worker processes can poll the same table without handing one batch to two workers.
//! Ownership checks are part of each `UPDATE`'s `WHERE` clause; an update that touches
//! no row is reported as a conflict.

use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::models::{PostgreSQLBatch, PostgreSQLBatchFile, BATCH_COLUMNS};
use crate::adapters::queue::traits::JobQueue;
use crate::config::QueueConfig;
use crate::domain::batch::{Batch, JobRequest};
use crate::domain::errors::QueueError;
use crate::domain::file::OutputFile;
use crate::domain::ids::{BatchId, JobId, OrganizationId, WorkerId};
use crate::domain::{AggregatorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::GenericClient;
use uuid::Uuid;

fn db_error(context: &'static str) -> impl FnOnce(tokio_postgres::Error) -> AggregatorError {
    move |e| AggregatorError::Database(format!("{context}: {e}"))
}

/// Job queue backed by PostgreSQL
pub struct PostgreSQLJobQueue {
    client: Arc<PostgreSQLClient>,
    batch_size: usize,
    lease: ChronoDuration,
    stale_after: ChronoDuration,
}

impl PostgreSQLJobQueue {
    /// Create a queue over an existing client
    pub fn new(client: Arc<PostgreSQLClient>, config: &QueueConfig) -> Self {
        Self {
            client,
            batch_size: config.batch_size,
            lease: ChronoDuration::minutes(config.lease_minutes as i64),
            stale_after: ChronoDuration::minutes(config.stale_minutes as i64),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }

    /// Loads the files of the given batches, grouped by batch
    async fn load_files<C: GenericClient + Sync>(
        conn: &C,
        batch_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<OutputFile>>> {
        let rows = conn
            .query(
                "SELECT batch_id, job_id, resource_type, sequence, file_name, count, checksum, \
                 file_length FROM job_queue_batch_file WHERE batch_id = ANY($1) \
                 ORDER BY resource_type, sequence",
                &[&batch_ids],
            )
            .await
            .map_err(db_error("Failed to load batch files"))?;

        let mut files: HashMap<Uuid, Vec<OutputFile>> = HashMap::new();
        for row in &rows {
            let file = PostgreSQLBatchFile::from_row(row)?;
            files.entry(file.batch_id).or_default().push(file.to_domain()?);
        }
        Ok(files)
    }

    /// Converts batch rows and attaches their files
    async fn to_batches<C: GenericClient + Sync>(
        conn: &C,
        rows: &[tokio_postgres::Row],
    ) -> Result<Vec<Batch>> {
        let records = rows
            .iter()
            .map(PostgreSQLBatch::from_row)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<Uuid> = records.iter().map(|r| r.batch_id).collect();
        let mut files = Self::load_files(conn, &ids).await?;

        records
            .iter()
            .map(|r| r.to_domain(files.remove(&r.batch_id).unwrap_or_default()))
            .collect()
    }

    /// Returns running batches whose lease has expired to the queue
    async fn restart_expired<C: GenericClient + Sync>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let cutoff = now - self.lease;
        let rows = conn
            .query(
                "UPDATE job_queue_batch \
                 SET status = 'QUEUED', aggregator_id = NULL, retry_count = retry_count + 1, \
                     update_time = $2 \
                 WHERE status = 'RUNNING' AND update_time < $1 \
                 RETURNING batch_id, patient_cursor, retry_count",
                &[&cutoff, &now],
            )
            .await
            .map_err(db_error("Failed to restart expired batches"))?;

        for row in &rows {
            let batch_id: Uuid = row.get("batch_id");
            let cursor: i32 = row.get("patient_cursor");
            let retry_count: i32 = row.get("retry_count");
            tracing::warn!(
                batch_id = %batch_id,
                patient_cursor = cursor,
                retry_count = retry_count,
                "Restarting batch with expired lease"
            );
        }
        Ok(())
    }

    /// Explains why an owner-checked update touched no row
    async fn ownership_error<C: GenericClient + Sync>(
        conn: &C,
        batch_id: &BatchId,
        worker: &WorkerId,
    ) -> AggregatorError {
        let row = conn
            .query_opt(
                "SELECT status, aggregator_id, patient_cursor, cardinality(patients) AS total \
                 FROM job_queue_batch WHERE batch_id = $1",
                &[batch_id.as_uuid()],
            )
            .await;

        match row {
            Ok(None) => QueueError::BatchNotFound(*batch_id).into(),
            Ok(Some(row)) => {
                let status: String = row.get("status");
                let owner: Option<Uuid> = row.get("aggregator_id");
                let cursor: i32 = row.get("patient_cursor");
                let total: Option<i32> = row.get("total");
                let reason = if status != "RUNNING" {
                    format!("batch is {status}, not RUNNING")
                } else if owner != Some(*worker.as_uuid()) {
                    format!("lease not held by worker {worker}")
                } else {
                    format!(
                        "cannot complete with {} of {} patients processed",
                        cursor,
                        total.unwrap_or(0)
                    )
                };
                QueueError::conflict(*batch_id, reason).into()
            }
            Err(e) => AggregatorError::Database(format!("Failed to read batch {batch_id}: {e}")),
        }
    }

    /// Persists cursor and files inside `tx`, checking ownership
    async fn save_progress(
        tx: &tokio_postgres::Transaction<'_>,
        batch: &Batch,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let cursor = batch.patient_cursor as i32;
        let updated = tx
            .execute(
                "UPDATE job_queue_batch \
                 SET patient_cursor = GREATEST(patient_cursor, LEAST($3, cardinality(patients))), \
                     update_time = $4 \
                 WHERE batch_id = $1 AND status = 'RUNNING' AND aggregator_id = $2",
                &[batch.batch_id.as_uuid(), worker.as_uuid(), &cursor, &now],
            )
            .await
            .map_err(db_error("Failed to update batch progress"))?;

        if updated == 0 {
            return Err(Self::ownership_error(tx, &batch.batch_id, worker).await);
        }

        for file in &batch.files {
            let row = PostgreSQLBatchFile::from_domain(file);
            tx.execute(
                "INSERT INTO job_queue_batch_file \
                 (batch_id, resource_type, sequence, job_id, file_name, count, checksum, file_length) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (batch_id, resource_type, sequence) DO UPDATE SET \
                     count = EXCLUDED.count, \
                     checksum = EXCLUDED.checksum, \
                     file_length = EXCLUDED.file_length",
                &[
                    &row.batch_id,
                    &row.resource_type,
                    &row.sequence,
                    &row.job_id,
                    &row.file_name,
                    &row.count,
                    &row.checksum,
                    &row.file_length,
                ],
            )
            .await
            .map_err(db_error("Failed to save batch file"))?;
        }
        Ok(())
    }

    /// Runs a progress save plus an optional status change in one transaction and
    /// refreshes `batch` from the stored row
    async fn settle(
        &self,
        batch: &mut Batch,
        worker: &WorkerId,
        status_update: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.client.get_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(db_error("Failed to start transaction"))?;

        Self::save_progress(&tx, batch, worker, now).await?;

        if let Some(statement) = status_update {
            let updated = tx
                .execute(statement, &[batch.batch_id.as_uuid(), worker.as_uuid(), &now])
                .await
                .map_err(db_error("Failed to update batch status"))?;
            if updated == 0 {
                return Err(Self::ownership_error(&*tx, &batch.batch_id, worker).await);
            }
        }

        let sql = format!("SELECT {BATCH_COLUMNS} FROM job_queue_batch WHERE batch_id = $1");
        let rows = tx
            .query(sql.as_str(), &[batch.batch_id.as_uuid()])
            .await
            .map_err(db_error("Failed to reload batch"))?;
        let refreshed = Self::to_batches(&*tx, &rows).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        if let Some(stored) = refreshed.into_iter().next() {
            *batch = stored;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PostgreSQLJobQueue {
    async fn create_job(&self, request: JobRequest) -> Result<JobId> {
        request.validate().map_err(QueueError::JobCreation)?;

        let job_id = JobId::generate();
        let batches = request.into_batches(job_id, self.batch_size, Utc::now());

        let mut conn = self.client.get_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(db_error("Failed to start transaction"))?;

        let sql = format!(
            "INSERT INTO job_queue_batch ({BATCH_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        for batch in &batches {
            let row = PostgreSQLBatch::from_domain(batch);
            tx.execute(
                sql.as_str(),
                &[
                    &row.batch_id,
                    &row.job_id,
                    &row.organization_id,
                    &row.provider_id,
                    &row.patients,
                    &row.resource_types,
                    &row.since,
                    &row.transaction_time,
                    &row.status,
                    &row.priority,
                    &row.patient_cursor,
                    &row.retry_count,
                    &row.aggregator_id,
                    &row.submit_time,
                    &row.start_time,
                    &row.update_time,
                    &row.complete_time,
                ],
            )
            .await
            .map_err(db_error("Failed to insert batch"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit job"))?;

        tracing::debug!(job_id = %job_id, batches = batches.len(), "Job created");
        Ok(job_id)
    }

    async fn claim_batch(&self, worker: &WorkerId) -> Result<Option<Batch>> {
        let now = Utc::now();
        let conn = self.client.get_connection().await?;

        self.restart_expired(&**conn, now).await?;

        let sql = format!(
            "WITH next AS ( \
                 SELECT batch_id FROM job_queue_batch \
                 WHERE status = 'QUEUED' \
                 ORDER BY priority, submit_time \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE job_queue_batch b \
             SET status = 'RUNNING', aggregator_id = $1, \
                 start_time = COALESCE(b.start_time, $2), update_time = $2 \
             FROM next WHERE b.batch_id = next.batch_id \
             RETURNING {}",
            BATCH_COLUMNS
                .split(", ")
                .map(|c| format!("b.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = conn
            .query(sql.as_str(), &[worker.as_uuid(), &now])
            .await
            .map_err(db_error("Failed to claim batch"))?;

        Ok(Self::to_batches(&**conn, &rows).await?.into_iter().next())
    }

    async fn complete_partial_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        self.settle(batch, worker, None).await
    }

    async fn complete_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        self.settle(
            batch,
            worker,
            Some(
                "UPDATE job_queue_batch \
                 SET status = 'COMPLETED', update_time = $3, complete_time = $3 \
                 WHERE batch_id = $1 AND status = 'RUNNING' AND aggregator_id = $2 \
                   AND patient_cursor >= cardinality(patients)",
            ),
        )
        .await
    }

    async fn fail_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE job_queue_batch \
             SET status = 'FAILED', update_time = $3, complete_time = $3 \
             WHERE batch_id = $1 AND status = 'RUNNING' AND aggregator_id = $2 \
             RETURNING {BATCH_COLUMNS}"
        );
        let conn = self.client.get_connection().await?;
        let rows = conn
            .query(
                sql.as_str(),
                &[batch.batch_id.as_uuid(), worker.as_uuid(), &now],
            )
            .await
            .map_err(db_error("Failed to fail batch"))?;

        if rows.is_empty() {
            return Err(Self::ownership_error(&**conn, &batch.batch_id, worker).await);
        }
        if let Some(stored) = Self::to_batches(&**conn, &rows).await?.into_iter().next() {
            *batch = stored;
        }
        Ok(())
    }

    async fn pause_batch(&self, batch: &mut Batch, worker: &WorkerId) -> Result<()> {
        self.settle(
            batch,
            worker,
            Some(
                "UPDATE job_queue_batch \
                 SET status = 'QUEUED', aggregator_id = NULL, update_time = $3 \
                 WHERE batch_id = $1 AND status = 'RUNNING' AND aggregator_id = $2",
            ),
        )
        .await
    }

    async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM job_queue_batch WHERE batch_id = $1");
        let conn = self.client.get_connection().await?;
        let rows = conn
            .query(sql.as_str(), &[batch_id.as_uuid()])
            .await
            .map_err(db_error("Failed to load batch"))?;
        Ok(Self::to_batches(&**conn, &rows).await?.into_iter().next())
    }

    async fn get_job_batches(&self, job_id: &JobId) -> Result<Vec<Batch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM job_queue_batch WHERE job_id = $1 ORDER BY submit_time"
        );
        let conn = self.client.get_connection().await?;
        let rows = conn
            .query(sql.as_str(), &[job_id.as_uuid()])
            .await
            .map_err(db_error("Failed to load job batches"))?;
        Self::to_batches(&**conn, &rows).await
    }

    async fn get_batch_file(
        &self,
        organization_id: &OrganizationId,
        file_name: &str,
    ) -> Result<Option<OutputFile>> {
        let row = self
            .client
            .query_opt(
                "SELECT f.batch_id, f.job_id, f.resource_type, f.sequence, f.file_name, \
                        f.count, f.checksum, f.file_length \
                 FROM job_queue_batch_file f \
                 JOIN job_queue_batch b ON b.batch_id = f.batch_id \
                 WHERE f.file_name = $1 AND b.organization_id = $2",
                &[&file_name, &organization_id.as_str()],
            )
            .await?;

        row.map(|r| PostgreSQLBatchFile::from_row(&r)?.to_domain())
            .transpose()
    }

    async fn queue_size(&self) -> Result<u64> {
        let rows = self
            .client
            .query(
                "SELECT COUNT(*) AS queued FROM job_queue_batch WHERE status = 'QUEUED'",
                &[],
            )
            .await?;
        let count: i64 = rows.first().map(|r| r.get("queued")).unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn queue_age(&self) -> Result<Option<Duration>> {
        let rows = self
            .client
            .query(
                "SELECT MIN(submit_time) AS oldest FROM job_queue_batch WHERE status = 'QUEUED'",
                &[],
            )
            .await?;
        let oldest: Option<DateTime<Utc>> = rows.first().and_then(|r| r.get("oldest"));
        Ok(oldest.and_then(|t| (Utc::now() - t).to_std().ok()))
    }

    async fn assert_healthy(&self, worker: &WorkerId) -> Result<()> {
        let cutoff = Utc::now() - self.stale_after;
        let row = self
            .client
            .query_opt(
                "SELECT batch_id, update_time FROM job_queue_batch \
                 WHERE status = 'RUNNING' AND aggregator_id = $1 AND update_time < $2 \
                 LIMIT 1",
                &[worker.as_uuid(), &cutoff],
            )
            .await?;

        match row {
            Some(row) => {
                let batch_id: Uuid = row.get("batch_id");
                let update_time: DateTime<Utc> = row.get("update_time");
                Err(QueueError::Unhealthy(format!(
                    "worker {worker} has batch {batch_id} stuck since {update_time}"
                ))
                .into())
            }
            None => Ok(()),
        }
    }

    fn queue_type(&self) -> &'static str {
        "postgresql"
    }
}
