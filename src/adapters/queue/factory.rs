//! Job queue factory
//!
//! This module provides the factory function that creates the queue backend selected
//! in configuration.

use crate::adapters::postgresql::{PostgreSQLClient, PostgreSQLJobQueue};
use crate::adapters::queue::memory::MemoryJobQueue;
use crate::adapters::queue::traits::JobQueue;
use crate::config::schema::{AggregatorConfig, QueueBackend};
use crate::domain::{AggregatorError, Result};
use std::sync::Arc;

/// Create a job queue based on the configuration
///
/// For the PostgreSQL backend the pool is created, the connection tested and, when
/// `postgresql.run_migrations` is set, the schema applied.
///
/// # Errors
///
/// Returns an error if the PostgreSQL section is missing or the database is unreachable
pub async fn create_job_queue(config: &AggregatorConfig) -> Result<Arc<dyn JobQueue + Send + Sync>> {
    match config.queue.backend {
        QueueBackend::Memory => {
            tracing::info!(batch_size = config.queue.batch_size, "Creating in-memory job queue");
            Ok(Arc::new(MemoryJobQueue::new(&config.queue)) as Arc<dyn JobQueue + Send + Sync>)
        }
        QueueBackend::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                AggregatorError::Configuration(
                    "postgresql configuration is required when queue.backend = 'postgresql'"
                        .to_string(),
                )
            })?;

            let client = PostgreSQLClient::new(pg_config.clone()).await?;
            tracing::info!(
                connection = %client.connection_string_safe(),
                "Creating PostgreSQL job queue"
            );
            client.test_connection().await?;
            if pg_config.run_migrations {
                client.ensure_database_exists().await?;
            }

            Ok(Arc::new(PostgreSQLJobQueue::new(Arc::new(client), &config.queue))
                as Arc<dyn JobQueue + Send + Sync>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        ApplicationConfig, DataServiceConfig, EngineConfig, LoggingConfig, OperationsConfig,
        QueueConfig, SourceConfig,
    };

    fn config(backend: QueueBackend) -> AggregatorConfig {
        AggregatorConfig {
            application: ApplicationConfig::default(),
            queue: QueueConfig {
                backend,
                ..QueueConfig::default()
            },
            postgresql: None,
            engine: EngineConfig::default(),
            operations: OperationsConfig::default(),
            source: SourceConfig::default(),
            data_service: DataServiceConfig::default(),
            logging: LoggingConfig::console_only(),
        }
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let queue = create_job_queue(&config(QueueBackend::Memory)).await.unwrap();
        assert_eq!(queue.queue_type(), "memory");
        assert_eq!(queue.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_postgresql_backend_requires_section() {
        let result = create_job_queue(&config(QueueBackend::PostgreSQL)).await;
        assert!(matches!(result, Err(AggregatorError::Configuration(_))));
    }
}
