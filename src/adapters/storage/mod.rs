//! Output file storage
//!
//! Output files are append-only NDJSON files on the local filesystem, addressed by
//! the deterministic name on their [`OutputFile`](crate::domain::OutputFile) record.

pub mod local;

pub use local::FileStore;
