//! Job queue
//!
//! Jobs wait in admission order. A job is handed out only when no other job with the same
//! [`StreamKey`] is executing and every job named in its queue hint has left the queue, which keeps
//! the history of each (document, scope, branch) totally ordered while unrelated documents run in
//! parallel.

use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::{
	job::{Job, JobId},
	stream::StreamKey,
};

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("queue is blocked, job <id='{0}'> rejected")]
	Blocked(JobId),
	#[error("job already queued <id='{0}'>")]
	Duplicate(JobId),
}

pub trait Queue: Send + Sync + 'static {
	fn enqueue(&self, job: Job) -> Result<(), QueueError>;

	/// Takes the next dispatchable job and marks its key as executing.
	fn dequeue_next(&self) -> Option<Job>;

	/// Releases the key of a job that completed.
	fn complete(&self, job_id: JobId);

	/// Releases the key of a job that failed for good.
	fn fail(&self, job_id: JobId, error: &str);

	fn remove(&self, job_id: JobId) -> bool;

	/// Drops every pending job of `key`, returning how many were dropped.
	fn clear(&self, key: &StreamKey) -> usize;

	fn pending_jobs(&self) -> Vec<Job>;

	fn executing_job_ids(&self) -> HashMap<StreamKey, HashSet<JobId>>;

	fn pause(&self);

	fn resume(&self);

	fn is_paused(&self) -> bool;

	/// Rejects every enqueue from now on, used while shutting down.
	fn block(&self);

	fn total_size(&self) -> usize;

	fn has_jobs(&self) -> bool {
		self.total_size() > 0
	}

	/// Signalled whenever a job might have become dispatchable.
	fn notifier(&self) -> Arc<Notify>;
}

#[derive(Debug, Default)]
struct State {
	pending: VecDeque<Job>,
	executing: HashMap<StreamKey, HashSet<JobId>>,
	executing_keys: HashMap<JobId, StreamKey>,
	paused: bool,
	blocked: bool,
}

impl State {
	fn is_queued(&self, job_id: JobId) -> bool {
		self.executing_keys.contains_key(&job_id) || self.pending.iter().any(|job| job.id == job_id)
	}

	fn next_dispatchable(&self) -> Option<usize> {
		let mut held = HashSet::new();

		for (position, job) in self.pending.iter().enumerate() {
			if held.contains(&job.key) || self.executing.contains_key(&job.key) {
				continue;
			}

			if job.queue_hint.iter().any(|dependency| self.is_queued(*dependency)) {
				// later jobs of this key must wait behind it
				held.insert(&job.key);
				continue;
			}

			return Some(position);
		}

		None
	}

	fn release(&mut self, job_id: JobId) -> bool {
		let Some(key) = self.executing_keys.remove(&job_id) else {
			return false;
		};

		if let Some(jobs) = self.executing.get_mut(&key) {
			jobs.remove(&job_id);
			if jobs.is_empty() {
				self.executing.remove(&key);
			}
		}

		true
	}
}

#[derive(Debug, Default)]
pub struct JobQueue {
	state: Mutex<State>,
	notify: Arc<Notify>,
}

impl JobQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn release(&self, job_id: JobId) -> bool {
		let released = self.state().release(job_id);
		if released {
			self.notify.notify_waiters();
		}
		released
	}
}

impl Queue for JobQueue {
	fn enqueue(&self, job: Job) -> Result<(), QueueError> {
		{
			let mut state = self.state();

			if state.blocked {
				return Err(QueueError::Blocked(job.id));
			}

			if state.is_queued(job.id) {
				return Err(QueueError::Duplicate(job.id));
			}

			trace!(job_id = %job.id, key = %job.key, "Job enqueued");
			state.pending.push_back(job);
		}

		self.notify.notify_waiters();

		Ok(())
	}

	fn dequeue_next(&self) -> Option<Job> {
		let mut state = self.state();

		if state.paused {
			return None;
		}

		let job = state
			.next_dispatchable()
			.and_then(|position| state.pending.remove(position))?;

		state
			.executing
			.entry(job.key.clone())
			.or_default()
			.insert(job.id);
		state.executing_keys.insert(job.id, job.key.clone());

		trace!(job_id = %job.id, key = %job.key, "Job dequeued");

		Some(job)
	}

	fn complete(&self, job_id: JobId) {
		if !self.release(job_id) {
			warn!(%job_id, "Tried to complete a job that wasn't executing");
		}
	}

	fn fail(&self, job_id: JobId, error: &str) {
		if self.release(job_id) {
			debug!(%job_id, %error, "Job failed and left the queue");
		} else {
			warn!(%job_id, "Tried to fail a job that wasn't executing");
		}
	}

	fn remove(&self, job_id: JobId) -> bool {
		let removed = {
			let mut state = self.state();
			let before = state.pending.len();
			state.pending.retain(|job| job.id != job_id);
			before != state.pending.len()
		};

		if removed {
			// dependents of the removed job may be free now
			self.notify.notify_waiters();
		}

		removed
	}

	fn clear(&self, key: &StreamKey) -> usize {
		let removed = {
			let mut state = self.state();
			let before = state.pending.len();
			state.pending.retain(|job| &job.key != key);
			before - state.pending.len()
		};

		if removed > 0 {
			self.notify.notify_waiters();
		}

		removed
	}

	fn pending_jobs(&self) -> Vec<Job> {
		self.state().pending.iter().cloned().collect()
	}

	fn executing_job_ids(&self) -> HashMap<StreamKey, HashSet<JobId>> {
		self.state().executing.clone()
	}

	fn pause(&self) {
		self.state().paused = true;
		debug!("Queue paused");
	}

	fn resume(&self) {
		self.state().paused = false;
		debug!("Queue resumed");
		self.notify.notify_waiters();
	}

	fn is_paused(&self) -> bool {
		self.state().paused
	}

	fn block(&self) {
		self.state().blocked = true;
	}

	fn total_size(&self) -> usize {
		let state = self.state();
		state.pending.len() + state.executing_keys.len()
	}

	fn notifier(&self) -> Arc<Notify> {
		Arc::clone(&self.notify)
	}
}
