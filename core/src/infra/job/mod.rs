//! Job execution
//!
//! The [`ExecutorManager`] drains the queue with a bounded pool of workers. Each attempt of a job
//! goes through an [`Executor`], which turns the job's actions into operations and commits them
//! together with the new snapshot. Retries, timeouts and lifecycle events are handled by the
//! manager, outcomes are recorded in the [`JobTracker`] for awaiters.

mod error;
mod executor;
mod manager;
mod tracker;
mod types;

pub use error::JobError;
pub use executor::{Executor, JobExecutor};
pub use manager::ExecutorManager;
pub use tracker::{JobAwaiter, JobTracker};
pub use types::{ExecutorStats, Job, JobId, JobInfo, JobStatus, ShutdownStatus};
