//! Per-resource-type file writer
//!
//! Appends records to the latest file of their type and starts a new sequence
//! whenever the current file holds `resources_per_file` rows. A file is sealed
//! with its checksum when it fills up or when the batch settles.

use crate::adapters::storage::FileStore;
use crate::domain::batch::Batch;
use crate::domain::outcome::OperationOutcome;
use crate::domain::resource_type::ResourceType;
use crate::domain::{AggregatorError, Result};
use serde_json::Value;

/// Writes records into a batch's output files
#[derive(Debug, Clone)]
pub struct ResourceWriter {
    store: FileStore,
    resources_per_file: u32,
}

impl ResourceWriter {
    pub fn new(store: FileStore, resources_per_file: u32) -> Self {
        Self {
            store,
            resources_per_file: resources_per_file.max(1),
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Appends `records` to the batch's files for `resource_type`
    ///
    /// No file is created when `records` is empty.
    pub async fn write(
        &self,
        batch: &mut Batch,
        resource_type: ResourceType,
        records: &[Value],
    ) -> Result<usize> {
        let mut remaining = records;
        while !remaining.is_empty() {
            let needs_new_file = batch
                .latest_file(resource_type)
                .map(|f| f.is_full(self.resources_per_file))
                .unwrap_or(true);
            if needs_new_file {
                batch.add_file(resource_type);
            }

            let file = batch.latest_file_mut(resource_type).ok_or_else(|| {
                AggregatorError::Storage(format!("No {resource_type} file for batch"))
            })?;
            let space = (self.resources_per_file - file.count.min(self.resources_per_file)) as usize;
            let (chunk, rest) = remaining.split_at(space.min(remaining.len()));
            self.store.append(file, chunk).await?;
            if file.is_full(self.resources_per_file) {
                self.store.seal(file).await?;
            }

            tracing::debug!(
                file_name = %file.file_name,
                appended = chunk.len(),
                count = file.count,
                "Appended records"
            );
            remaining = rest;
        }
        Ok(records.len())
    }

    /// Seals every file of the batch that is still open
    pub async fn seal_all(&self, batch: &mut Batch) -> Result<()> {
        for file in batch.files.iter_mut() {
            self.store.seal(file).await?;
        }
        Ok(())
    }

    /// Appends one outcome entry to the batch's outcome file
    pub async fn write_outcome(&self, batch: &mut Batch, outcome: &OperationOutcome) -> Result<()> {
        let value = serde_json::to_value(outcome)?;
        self.write(batch, ResourceType::OperationOutcome, &[value])
            .await
            .map(|_| ())
    }
}
