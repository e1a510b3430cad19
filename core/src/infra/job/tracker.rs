use std::{
	collections::HashMap,
	pin::pin,
	sync::{Mutex, MutexGuard, PoisonError},
};

use reactor_sync::Operation;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Job, JobError, JobId, JobInfo, JobStatus};

/// Resolves once a job reached a terminal status.
#[async_trait]
pub trait JobAwaiter: Send + Sync + 'static {
	async fn wait_for_job(
		&self,
		job_id: JobId,
		cancel: Option<&CancellationToken>,
	) -> Result<JobInfo, JobError>;
}

/// Last known [`JobInfo`] of every job submitted to the reactor.
#[derive(Debug, Default)]
pub struct JobTracker {
	jobs: Mutex<HashMap<JobId, JobInfo>>,
	notify: Notify,
}

impl JobTracker {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobInfo>> {
		self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn update(&self, job_id: JobId, f: impl FnOnce(&mut JobInfo)) {
		if let Some(info) = self.jobs().get_mut(&job_id) {
			f(info);
			trace!(%job_id, status = %info.status, "Job status updated");
		}

		self.notify.notify_waiters();
	}

	pub fn register(&self, job: &Job) -> JobInfo {
		let info = JobInfo::pending(job);
		self.jobs().insert(job.id, info.clone());
		info
	}

	pub fn start(&self, job_id: JobId, attempt: u32) {
		self.update(job_id, |info| {
			info.status = JobStatus::Running;
			info.attempts = attempt;
		});
	}

	/// Back to pending, waiting for the next attempt.
	pub fn retrying(&self, job_id: JobId, error: String) {
		self.update(job_id, |info| {
			info.status = JobStatus::Pending;
			info.error_history.push(error);
		});
	}

	pub fn complete(&self, job_id: JobId, operations: Vec<Operation>) {
		self.update(job_id, |info| {
			info.status = JobStatus::Completed;
			info.completed_at = Some(Utc::now());
			info.operations = operations;
		});
	}

	pub fn fail(&self, job_id: JobId, error: String) {
		self.update(job_id, |info| {
			info.status = JobStatus::Failed;
			info.completed_at = Some(Utc::now());
			info.error_history.push(error.clone());
			info.error = Some(error);
		});
	}

	#[must_use]
	pub fn get(&self, job_id: JobId) -> Option<JobInfo> {
		self.jobs().get(&job_id).cloned()
	}

	#[must_use]
	pub fn with_status(&self, status: JobStatus) -> Vec<JobInfo> {
		let mut jobs = self
			.jobs()
			.values()
			.filter(|info| info.status == status)
			.cloned()
			.collect::<Vec<_>>();
		jobs.sort_by_key(|info| info.created_at);
		jobs
	}

	/// Forgets every job that reached a terminal status, returns how many were dropped.
	pub fn prune(&self) -> usize {
		let mut jobs = self.jobs();
		let before = jobs.len();
		jobs.retain(|_, info| !info.status.is_terminal());
		before - jobs.len()
	}
}

#[async_trait]
impl JobAwaiter for JobTracker {
	async fn wait_for_job(
		&self,
		job_id: JobId,
		cancel: Option<&CancellationToken>,
	) -> Result<JobInfo, JobError> {
		loop {
			let mut notified = pin!(self.notify.notified());
			// register before checking, so an update between the check and the await isn't lost
			notified.as_mut().enable();

			match self.get(job_id) {
				None => return Err(JobError::NotFound(job_id)),
				Some(info) if info.status.is_terminal() => return Ok(info),
				Some(_) => {}
			}

			match cancel {
				Some(cancel) => {
					tokio::select! {
						() = cancel.cancelled() => return Err(JobError::Cancelled),
						() = notified => {}
					}
				}
				None => notified.await,
			}
		}
	}
}
