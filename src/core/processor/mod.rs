//! Batch processing
//!
//! - [`batch`] - the per-patient loop over a claimed batch
//! - [`writer`] - per-resource-type output files with rollover

pub mod batch;
pub mod writer;

pub use batch::{BatchProcessor, ProcessResult, ProcessStatus};
pub use writer::ResourceWriter;
