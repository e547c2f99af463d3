//! Local filesystem file store

use crate::domain::file::OutputFile;
use crate::domain::{AggregatorError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only NDJSON files under one export directory
#[derive(Debug, Clone)]
pub struct FileStore {
    export_path: PathBuf,
}

impl FileStore {
    pub fn new(export_path: impl Into<PathBuf>) -> Self {
        Self {
            export_path: export_path.into(),
        }
    }

    /// Export directory
    pub fn export_path(&self) -> &Path {
        &self.export_path
    }

    /// Creates the export directory if needed
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.export_path).await.map_err(|e| {
            AggregatorError::Storage(format!(
                "Failed to create export directory {}: {}",
                self.export_path.display(),
                e
            ))
        })
    }

    /// Location of a file on disk
    pub fn path_for(&self, file: &OutputFile) -> PathBuf {
        file.path_in(&self.export_path)
    }

    /// Appends one line per value and advances the file's count and length
    ///
    /// The checksum is cleared; [`FileStore::seal`] records it once the file stops
    /// growing.
    pub async fn append(&self, file: &mut OutputFile, values: &[Value]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for value in values {
            serde_json::to_writer(&mut buffer, value)?;
            buffer.push(b'\n');
        }

        let path = self.path_for(file);
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_error("open", &path, e))?;
        handle
            .write_all(&buffer)
            .await
            .map_err(|e| storage_error("write", &path, e))?;
        handle
            .flush()
            .await
            .map_err(|e| storage_error("flush", &path, e))?;

        file.count += values.len() as u32;
        file.file_length += buffer.len() as u64;
        file.checksum.clear();
        Ok(())
    }

    /// Records the SHA-256 and length of a file that will not be appended to again
    ///
    /// Already sealed files are left alone.
    pub async fn seal(&self, file: &mut OutputFile) -> Result<()> {
        if file.is_sealed() {
            return Ok(());
        }
        let path = self.path_for(file);
        let contents = fs::read(&path)
            .await
            .map_err(|e| storage_error("read", &path, e))?;
        file.file_length = contents.len() as u64;
        file.checksum = Sha256::digest(&contents).to_vec();
        Ok(())
    }

    /// Every line of a file, in write order
    pub async fn read_lines(&self, file: &OutputFile) -> Result<Vec<String>> {
        let path = self.path_for(file);
        let contents = fs::read_to_string(&path)
            .await
            .map_err(|e| storage_error("read", &path, e))?;
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Every line of a file parsed as JSON
    pub async fn read_resources(&self, file: &OutputFile) -> Result<Vec<Value>> {
        self.read_lines(file)
            .await?
            .iter()
            .map(|line| serde_json::from_str(line).map_err(AggregatorError::from))
            .collect()
    }

    /// Whether the file on disk still matches its recorded length and checksum
    ///
    /// Unsealed files never verify.
    pub async fn verify(&self, file: &OutputFile) -> Result<bool> {
        if !file.is_sealed() {
            return Ok(false);
        }
        let path = self.path_for(file);
        let contents = fs::read(&path)
            .await
            .map_err(|e| storage_error("read", &path, e))?;
        Ok(contents.len() as u64 == file.file_length
            && Sha256::digest(&contents).as_slice() == file.checksum.as_slice())
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> AggregatorError {
    AggregatorError::Storage(format!("Failed to {action} {}: {err}", path.display()))
}
