//! PostgreSQL client implementation
//!
//! Connection pooling and statement helpers shared by the PostgreSQL job queue.

use crate::config::schema::PostgreSQLConfig;
use crate::domain::{AggregatorError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

/// PostgreSQL client for the job queue
pub struct PostgreSQLClient {
    /// Connection pool
    pool: Pool,

    /// Configuration
    config: PostgreSQLConfig,
}

impl PostgreSQLClient {
    /// Create a new PostgreSQL client
    ///
    /// The pool connects lazily; call [`test_connection`](Self::test_connection) to
    /// verify the database is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the pool cannot be built.
    pub async fn new(config: PostgreSQLConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config =
            config.connection_string.expose_secret().as_str().parse().map_err(|e| {
                AggregatorError::Configuration(format!(
                    "Invalid PostgreSQL connection string: {e}"
                ))
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Some(Duration::from_secs(config.connection_timeout_seconds));
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(timeout)
            .create_timeout(timeout)
            .recycle_timeout(timeout)
            .build()
            .map_err(|e| {
                AggregatorError::Database(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self { pool, config })
    }

    /// Test the connection to PostgreSQL
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| AggregatorError::Database(format!("Connection test failed: {e}")))?;

        tracing::info!("PostgreSQL connection test successful");
        Ok(())
    }

    /// Ensure the queue schema exists
    ///
    /// Runs the bundled migration. Every statement is `IF NOT EXISTS`, so repeated
    /// runs are harmless.
    pub async fn ensure_database_exists(&self) -> Result<()> {
        let client = self.get_connection().await?;

        let migration_sql = include_str!("../../../migrations/001_initial_schema.sql");

        client.batch_execute(migration_sql).await.map_err(|e| {
            AggregatorError::Database(format!("Failed to execute migration: {e}"))
        })?;

        tracing::info!("PostgreSQL schema initialized successfully");
        Ok(())
    }

    /// Get a connection from the pool with the statement timeout applied
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be obtained.
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Object> {
        let client = self.pool.get().await.map_err(|e| {
            AggregatorError::Database(format!("Failed to get connection from pool: {e}"))
        })?;

        let timeout_query = format!(
            "SET statement_timeout = {}",
            self.config.statement_timeout_seconds * 1000
        );
        client.batch_execute(&timeout_query).await.map_err(|e| {
            AggregatorError::Database(format!("Failed to set statement timeout: {e}"))
        })?;

        Ok(client)
    }

    /// Execute a query and return rows
    pub async fn query(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        let client = self.get_connection().await?;
        client
            .query(query, params)
            .await
            .map_err(|e| AggregatorError::Database(format!("Query failed: {e}")))
    }

    /// Execute a query expected to return at most one row
    pub async fn query_opt(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Option<Row>> {
        let client = self.get_connection().await?;
        client
            .query_opt(query, params)
            .await
            .map_err(|e| AggregatorError::Database(format!("Query failed: {e}")))
    }

    /// Execute a statement and return the number of affected rows
    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<u64> {
        let client = self.get_connection().await?;
        client
            .execute(statement, params)
            .await
            .map_err(|e| AggregatorError::Database(format!("Statement execution failed: {e}")))
    }

    /// Get the connection string (without credentials)
    pub fn connection_string_safe(&self) -> String {
        redact_connection_string(self.config.connection_string.expose_secret().as_str())
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

fn redact_connection_string(connection_string: &str) -> String {
    match connection_string.rsplit_once('@') {
        Some((_, host)) => format!("postgresql://***@{host}"),
        None => "postgresql://***".to_string(),
    }
}
