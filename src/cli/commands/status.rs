//! Status command implementation
//!
//! This module implements the `status` command for displaying a job's rolled-up
//! status, per-batch progress, optional per-file detail and the current queue
//! depth.

use crate::adapters::queue::create_job_queue;
use crate::config::{load_config, QueueBackend};
use crate::domain::batch::{rollup_status, Batch, BatchStatus};
use crate::domain::file::OutputFile;
use crate::domain::ids::JobId;
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Job ID returned by `submit`
    pub job_id: String,

    /// List every output file of each batch
    #[arg(long)]
    pub files: bool,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(job_id = %self.job_id, "Checking job status");

        println!("📊 Job Status");
        println!();

        let job_id: JobId = match self.job_id.parse() {
            Ok(id) => id,
            Err(e) => {
                println!("❌ {e}");
                return Ok(2);
            }
        };

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {}", e);
                return Ok(2); // Configuration error exit code
            }
        };

        if config.queue.backend == QueueBackend::Memory {
            println!("⚠️  The memory queue only holds jobs submitted in this process.");
        }

        let queue = match create_job_queue(&config).await {
            Ok(q) => q,
            Err(e) => {
                println!("❌ Failed to connect to queue");
                println!("   Error: {}", e);
                return Ok(4); // Connection error exit code
            }
        };

        let batches = match queue.get_job_batches(&job_id).await {
            Ok(b) => b,
            Err(e) => {
                println!("❌ Failed to load job batches");
                println!("   Error: {}", e);
                return Ok(5); // Fatal error exit code
            }
        };

        let Some(status) = rollup_status(batches.iter().map(|b| b.status)) else {
            println!("No job found with ID {job_id}.");
            return Ok(0);
        };

        println!("Job {job_id}: {}", status_label(status));
        println!();
        println!(
            "{:<38} {:<15} {:<12} {:<8} {:<25}",
            "Batch ID", "Status", "Progress", "Files", "Last Update"
        );
        println!("{}", "-".repeat(100));

        for batch in &batches {
            println!(
                "{:<38} {:<15} {:<12} {:<8} {:<25}",
                batch.batch_id.to_string(),
                status_label(batch.status),
                progress(batch),
                batch.files.len(),
                batch.update_time.format("%Y-%m-%d %H:%M:%S")
            );
            if self.files {
                for file in &batch.files {
                    println!("    {}", file_line(file));
                }
            }
        }

        println!();
        let queued = queue.queue_size().await?;
        let age = queue
            .queue_age()
            .await?
            .map(|age| format!("{}s", age.as_secs()))
            .unwrap_or_else(|| "-".to_string());
        println!("Queue: {queued} batch(es) waiting, oldest {age}");
        println!();
        Ok(0)
    }
}

fn status_label(status: BatchStatus) -> &'static str {
    match status {
        BatchStatus::Completed => "✅ Completed",
        BatchStatus::Running => "🔄 Running",
        BatchStatus::Failed => "❌ Failed",
        BatchStatus::Queued => "⏸️  Queued",
    }
}

fn file_line(file: &OutputFile) -> String {
    let checksum = if file.is_sealed() {
        file.checksum_hex()
    } else {
        "open".to_string()
    };
    format!(
        "{} ({} records, {} bytes, sha256 {})",
        file.file_name, file.count, file.file_length, checksum
    )
}

fn progress(batch: &Batch) -> String {
    format!("{}/{}", batch.patient_cursor, batch.patients.len())
}
