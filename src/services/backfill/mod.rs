//! Historical price backfill
//!
//! - `runner` walks a token's history day by day and persists daily prices
//! - `queue` schedules runs with bounded concurrency, retries failed runs and
//!   tracks job state
//! - `job` holds the job record and the events published while it runs

mod job;
mod queue;
mod runner;

pub use job::{BackfillJob, DEFAULT_PRIORITY, JobEvent, JobHandle, JobStatus};
pub use queue::{BackfillQueue, QueueError, run_backfill_housekeeping};
pub use runner::{BackfillError, BackfillRunner, BackfillSummary};
