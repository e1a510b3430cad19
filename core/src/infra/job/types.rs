//! Core types for the job system

use std::fmt;

use reactor_sync::{Action, Operation};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infra::stream::StreamKey;

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<Uuid> for JobId {
	fn from(uuid: Uuid) -> Self {
		Self(uuid)
	}
}

impl From<JobId> for Uuid {
	fn from(id: JobId) -> Self {
		id.0
	}
}

/// A unit of work on one (document, scope, branch): either actions to apply in order, or
/// operations received from another replica to load into the local history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: JobId,
	pub key: StreamKey,
	pub document_type: String,
	pub actions: Vec<Action>,
	#[serde(default)]
	pub operations: Vec<Operation>,
	/// Jobs that must complete before this one is dispatched
	#[serde(default)]
	pub queue_hint: Vec<JobId>,
	pub retry_count: u32,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub error_history: Vec<String>,
}

impl Job {
	pub fn new(key: StreamKey, document_type: impl Into<String>, actions: Vec<Action>) -> Self {
		Self {
			id: JobId::new(),
			key,
			document_type: document_type.into(),
			actions,
			operations: Vec::new(),
			queue_hint: Vec::new(),
			retry_count: 0,
			created_at: Utc::now(),
			error_history: Vec::new(),
		}
	}

	/// A job reshuffling `operations` into the history of `key`.
	pub fn load(
		key: StreamKey,
		document_type: impl Into<String>,
		operations: Vec<Operation>,
	) -> Self {
		Self {
			operations,
			..Self::new(key, document_type, Vec::new())
		}
	}

	#[must_use]
	pub fn is_load(&self) -> bool {
		!self.operations.is_empty()
	}

	#[must_use]
	pub fn after(mut self, dependencies: impl IntoIterator<Item = JobId>) -> Self {
		self.queue_hint.extend(dependencies);
		self
	}
}

/// Current status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	/// Job is waiting in the queue, possibly for a retry
	Pending,
	/// Job is currently running
	Running,
	/// Job completed and its operations are in the log
	Completed,
	/// Job failed and will not be retried
	Failed,
}

impl JobStatus {
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Pending => write!(f, "Pending"),
			Self::Running => write!(f, "Running"),
			Self::Completed => write!(f, "Completed"),
			Self::Failed => write!(f, "Failed"),
		}
	}
}

/// Information about a job (for awaiting/querying)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
	pub id: JobId,
	pub key: StreamKey,
	pub status: JobStatus,
	pub attempts: u32,
	pub created_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub error: Option<String>,
	pub error_history: Vec<String>,
	pub operations: Vec<Operation>,
}

impl JobInfo {
	#[must_use]
	pub fn pending(job: &Job) -> Self {
		Self {
			id: job.id,
			key: job.key.clone(),
			status: JobStatus::Pending,
			attempts: 0,
			created_at: job.created_at,
			completed_at: None,
			error: None,
			error_history: Vec::new(),
			operations: Vec::new(),
		}
	}
}

/// How the executor manager went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ShutdownStatus {
	/// Every in-flight job finished within the grace period
	Graceful,
	/// The grace period elapsed and the remaining jobs were aborted
	Forced { aborted_jobs: usize },
}

impl ShutdownStatus {
	#[must_use]
	pub const fn is_graceful(&self) -> bool {
		matches!(self, Self::Graceful)
	}
}

/// Counters exposed by the executor manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
	pub running: usize,
	pub pending: usize,
	pub completed: u64,
	pub failed: u64,
	pub retried: u64,
}
