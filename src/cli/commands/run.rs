//! Run command implementation
//!
//! Starts the configured number of aggregation engines against the configured
//! queue and keeps them polling until SIGINT/SIGTERM. In-flight batches are paused
//! on shutdown so another worker can resume them.

use crate::adapters::queue::{create_job_queue, JobQueue};
use crate::adapters::source::{
    ClaimsSource, ConsentSource, HttpSourceClient, IdentitySource, MockSource, RecordSource,
};
use crate::adapters::storage::FileStore;
use crate::config::{load_config, AggregatorConfig};
use crate::core::eligibility::{EligibilityGate, LookBackValidator, SuppressionCheck};
use crate::core::engine::{AggregationEngine, EngineHealthCheck};
use crate::core::processor::{BatchProcessor, ResourceWriter};
use crate::domain::Result;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the number of workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Serve records from an empty in-memory source instead of the HTTP source
    #[arg(long)]
    pub mock_source: bool,
}

/// Upstream sources, one handle per seam
pub struct Sources {
    pub records: Arc<dyn RecordSource + Send + Sync>,
    pub claims: Arc<dyn ClaimsSource + Send + Sync>,
    pub consent: Arc<dyn ConsentSource + Send + Sync>,
    pub identity: Arc<dyn IdentitySource + Send + Sync>,
}

impl Sources {
    /// HTTP client for every seam
    pub fn http(config: &AggregatorConfig) -> Result<Self> {
        let client = Arc::new(HttpSourceClient::new(config.source.clone())?);
        Ok(Self {
            records: client.clone(),
            claims: client.clone(),
            consent: client.clone(),
            identity: client,
        })
    }

    /// Empty in-memory source for every seam
    pub fn mock() -> Self {
        let source = Arc::new(MockSource::new());
        Self {
            records: source.clone(),
            claims: source.clone(),
            consent: source.clone(),
            identity: source,
        }
    }
}

/// Builds the batch processor for a configuration
pub async fn build_processor(
    config: &AggregatorConfig,
    queue: Arc<dyn JobQueue + Send + Sync>,
    sources: Sources,
) -> Result<BatchProcessor> {
    let store = FileStore::new(&config.operations.export_path);
    store.ensure_dir().await?;

    let gate = EligibilityGate::new(
        SuppressionCheck::from_config(&config.operations, sources.identity, sources.consent),
        LookBackValidator::from_config(&config.operations, sources.claims),
    );

    Ok(BatchProcessor::new(
        queue,
        sources.records,
        Arc::new(gate),
        ResourceWriter::new(store, config.operations.resources_per_file),
    ))
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let mut config = load_config(config_path)?;
        if let Some(workers) = self.workers {
            tracing::info!(workers, "Overriding worker count from CLI");
            config.engine.workers = workers;
        }
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        let queue = match create_job_queue(&config).await {
            Ok(q) => q,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create job queue");
                eprintln!("Failed to connect to queue: {e}");
                return Ok(4);
            }
        };

        let sources = if self.mock_source {
            tracing::warn!("Using in-memory mock source, no records will be exported");
            Sources::mock()
        } else {
            Sources::http(&config)?
        };
        let processor = build_processor(&config, queue.clone(), sources).await?;

        let mut engines = JoinSet::new();
        let mut probes: Vec<EngineHealthCheck> = Vec::new();
        for _ in 0..config.engine.workers {
            let engine = AggregationEngine::new(queue.clone(), processor.clone(), config.engine.clone());
            probes.push(engine.health_check());
            let shutdown = shutdown_signal.clone();
            engines.spawn(async move { engine.run(shutdown).await });
        }

        println!(
            "🚀 Running {} worker(s) on the {} queue. Press Ctrl+C to stop.",
            config.engine.workers,
            queue.queue_type()
        );

        let probe_interval = Duration::from_secs(config.engine.heartbeat_stale_secs.max(1));
        let mut shutdown = shutdown_signal.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(probe_interval) => {
                    for probe in &probes {
                        let status = probe.check();
                        if !status.is_healthy() {
                            tracing::warn!(status = ?status, "Engine health check failed");
                        }
                        if let Err(e) = probe.check_queue().await {
                            tracing::warn!(error = %e, "Queue health check failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        println!("⏸️  Shutdown requested, pausing in-flight batches...");
        let timeout = Duration::from_secs(config.engine.shutdown_timeout_secs);
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = engines.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Engine task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout_secs = config.engine.shutdown_timeout_secs,
                "Workers did not stop in time, their batches will be reclaimed after the lease expires"
            );
            engines.abort_all();
            return Ok(5);
        }

        println!("✅ All workers stopped.");
        Ok(130)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_defaults() {
        let args = RunArgs {
            workers: None,
            mock_source: false,
        };
        assert!(args.workers.is_none());
        assert!(!args.mock_source);
    }

    #[tokio::test]
    async fn test_build_processor_creates_export_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let export_path = dir.path().join("export");
        let mut config: AggregatorConfig = toml::from_str(
            r#"
            [source]
            base_url = "http://localhost:8080/v2/fhir"
            "#,
        )
        .unwrap();
        config.operations.export_path = export_path.display().to_string();

        let queue = create_job_queue(&config).await.unwrap();
        build_processor(&config, queue, Sources::mock()).await.unwrap();
        assert!(export_path.is_dir());
    }
}
