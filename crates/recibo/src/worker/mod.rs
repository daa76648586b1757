//! Worker pool that drains the categorization queue on OS threads.

pub mod job;
pub mod pool;

pub use job::{Disposition, JobResult, QueueJob};
pub use pool::{drain_queue, DrainStats, WorkerPool};
