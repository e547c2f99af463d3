//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for the aggregator using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Aggregator - clinical records export pipeline
#[derive(Parser, Debug)]
#[command(name = "aggregator")]
#[command(version, about, long_about = None)]
#[command(author = "Aggregator Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "aggregator.toml", env = "AGGREGATOR_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "AGGREGATOR_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run aggregation engine workers until interrupted
    Run(commands::run::RunArgs),

    /// Enqueue an export job
    Submit(commands::submit::SubmitArgs),

    /// Show job status and batch progress
    Status(commands::status::StatusArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}
