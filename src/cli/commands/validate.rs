//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the aggregator configuration file.

use crate::config::{load_config, QueueBackend};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates before returning
        let config = match load_config(config_path) {
            Ok(c) => {
                println!("✅ Configuration is valid");
                c
            }
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                return Ok(2); // Configuration error exit code
            }
        };

        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);

        match config.queue.backend {
            QueueBackend::Memory => println!("  Queue Backend: memory"),
            QueueBackend::PostgreSQL => {
                println!("  Queue Backend: postgresql");
                if let Some(ref pg_config) = config.postgresql {
                    use secrecy::ExposeSecret;
                    let conn_str = pg_config.connection_string.expose_secret().as_str();
                    println!(
                        "  PostgreSQL Connection: {}",
                        conn_str.split('@').next_back().unwrap_or("***")
                    );
                    println!("  Max Connections: {}", pg_config.max_connections);
                }
            }
        }

        println!("  Batch Size: {}", config.queue.batch_size);
        println!("  Lease: {} min", config.queue.lease_minutes);
        println!("  Workers: {}", config.engine.workers);
        println!("  Source: {}", config.source.base_url);
        println!("  Consent Source: {}", config.source.consent_base_url());
        println!("  Export Path: {}", config.operations.export_path);
        println!("  Resources Per File: {}", config.operations.resources_per_file);
        if config.operations.look_back_enabled {
            println!("  Look-Back: {} month(s)", config.operations.look_back_months);
        } else {
            println!("  Look-Back: disabled");
        }
        println!(
            "  Consent Check: {}",
            if config.operations.consent_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();
        Ok(0)
    }
}
