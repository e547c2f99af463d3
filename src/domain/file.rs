//! Output file model
//!
//! One `OutputFile` exists per (batch, resource type, sequence). A resource type
//! spans several sequence-numbered files once the per-file row threshold is hit.

use crate::domain::ids::{BatchId, JobId};
use crate::domain::resource_type::ResourceType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension appended to every output file name on disk
pub const OUTPUT_FILE_EXTENSION: &str = "ndjson";

/// Metadata for one NDJSON output file written by the batch processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Batch that produced the file
    pub batch_id: BatchId,

    /// Job the batch belongs to
    pub job_id: JobId,

    /// Resource type of every line in the file
    pub resource_type: ResourceType,

    /// Sequence number within the resource type, starting at 0
    pub sequence: u32,

    /// File name without extension: `{batchID}-{sequence}.{resourceType}`
    pub file_name: String,

    /// Number of lines written
    pub count: u32,

    /// SHA-256 of the file contents, empty until the file is sealed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checksum: Vec<u8>,

    /// File size in bytes
    #[serde(default)]
    pub file_length: u64,
}

impl OutputFile {
    /// Creates metadata for a new, empty file
    pub fn new(batch_id: BatchId, job_id: JobId, resource_type: ResourceType, sequence: u32) -> Self {
        Self {
            batch_id,
            job_id,
            resource_type,
            sequence,
            file_name: Self::form_file_name(&batch_id, resource_type, sequence),
            count: 0,
            checksum: Vec::new(),
            file_length: 0,
        }
    }

    /// Deterministic file name for a (batch, type, sequence) triple
    ///
    /// ```
    /// use aggregator::domain::file::OutputFile;
    /// use aggregator::domain::ids::BatchId;
    /// use aggregator::domain::resource_type::ResourceType;
    /// use std::str::FromStr;
    ///
    /// let batch_id = BatchId::from_str("7d44b88c-4199-4bad-97dc-d78268e01398").unwrap();
    /// assert_eq!(
    ///     OutputFile::form_file_name(&batch_id, ResourceType::Patient, 2),
    ///     "7d44b88c-4199-4bad-97dc-d78268e01398-2.Patient"
    /// );
    /// ```
    pub fn form_file_name(batch_id: &BatchId, resource_type: ResourceType, sequence: u32) -> String {
        format!("{}-{}.{}", batch_id, sequence, resource_type)
    }

    /// Full path of the file inside an export directory
    pub fn path_in(&self, export_path: &Path) -> PathBuf {
        export_path.join(format!("{}.{}", self.file_name, OUTPUT_FILE_EXTENSION))
    }

    /// Whether the file has reached the per-file row threshold
    pub fn is_full(&self, resources_per_file: u32) -> bool {
        self.count >= resources_per_file
    }

    /// Whether the checksum has been recorded since the last append
    pub fn is_sealed(&self) -> bool {
        !self.checksum.is_empty()
    }

    /// Hex encoding of the checksum, for status output
    pub fn checksum_hex(&self) -> String {
        self.checksum.iter().map(|b| format!("{b:02x}")).collect()
    }
}
