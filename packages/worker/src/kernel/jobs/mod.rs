//! Durable job queue over the `jobs` table.

pub mod job;
pub mod queue;

pub use job::{Job, JobStatus};
pub use queue::{EnqueueOutcome, JobQueue, QueueCounts, MAX_ATTEMPTS};
