//! Job queue backends
//!
//! - [`MemoryJobQueue`] keeps batches in process memory
//! - [`PostgreSQLJobQueue`](crate::adapters::postgresql::PostgreSQLJobQueue) shares
//!   them between processes
//!
//! Both implement [`JobQueue`]; [`create_job_queue`] picks one from configuration.

pub mod factory;
pub mod memory;
pub mod traits;

pub use factory::create_job_queue;
pub use memory::MemoryJobQueue;
pub use traits::JobQueue;
