//! Synchronous facades over the pipeline

pub mod data;

pub use data::{DataResult, DataService};
