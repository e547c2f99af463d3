//! Submit command implementation
//!
//! Enqueues an export job and prints its ID.

use crate::adapters::queue::create_job_queue;
use crate::config::{load_config, QueueBackend};
use crate::domain::batch::{JobPriority, JobRequest};
use crate::domain::ids::{OrganizationId, PatientId, ProviderId};
use crate::domain::resource_type::ResourceType;
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};

/// Priority names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    Interactive,
    Bulk,
}

impl From<PriorityArg> for JobPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Interactive => JobPriority::Interactive,
            PriorityArg::Bulk => JobPriority::Bulk,
        }
    }
}

/// Arguments for the submit command
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Requesting organization
    #[arg(long)]
    pub organization: String,

    /// Requesting provider identifier
    #[arg(long)]
    pub provider: String,

    /// Patient identifiers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub patients: Vec<String>,

    /// Resource types to export (comma-separated)
    #[arg(
        long = "types",
        value_delimiter = ',',
        default_value = "Patient,Coverage,ExplanationOfBenefit"
    )]
    pub resource_types: Vec<String>,

    /// Only export records updated after this RFC 3339 timestamp
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Override the priority derived from the patient count
    #[arg(long, value_enum)]
    pub priority: Option<PriorityArg>,
}

impl SubmitArgs {
    /// Builds the job request from the arguments
    pub fn to_request(&self) -> Result<JobRequest, String> {
        let patients = self
            .patients
            .iter()
            .map(|p| PatientId::new(p.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        let resource_types = self
            .resource_types
            .iter()
            .map(|rt| rt.trim().parse::<ResourceType>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = JobRequest::new(
            OrganizationId::new(self.organization.trim())?,
            ProviderId::new(self.provider.trim())?,
            patients,
            resource_types,
        );
        if let Some(since) = self.since {
            request = request.with_since(since);
        }
        if let Some(priority) = self.priority {
            request = request.with_priority(priority.into());
        }
        request.validate()?;
        Ok(request)
    }

    /// Execute the submit command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        let request = match self.to_request() {
            Ok(r) => r,
            Err(e) => {
                println!("❌ Invalid job request: {e}");
                return Ok(2);
            }
        };

        if config.queue.backend == QueueBackend::Memory {
            println!("⚠️  The memory queue is not shared; this job is only visible to this process.");
        }

        let queue = match create_job_queue(&config).await {
            Ok(q) => q,
            Err(e) => {
                println!("❌ Failed to connect to queue");
                println!("   Error: {e}");
                return Ok(4);
            }
        };

        let patient_count = request.patients.len();
        let job_id = queue.create_job(request).await?;
        tracing::info!(job_id = %job_id, patients = patient_count, "Job submitted");

        println!("{job_id}");
        Ok(0)
    }
}
