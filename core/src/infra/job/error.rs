use std::time::Duration;

use thiserror::Error;

use crate::{
	domain::ReducerError,
	infra::{cache::CacheError, queue::QueueError, store::StorageError},
};

use super::JobId;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("no reducer registered for document type '{0}'")]
	UnknownDocumentType(String),
	#[error("action scope '{action_scope}' doesn't match the job scope '{job_scope}'")]
	ScopeMismatch {
		action_scope: String,
		job_scope: String,
	},
	#[error("job has nothing to apply <id='{0}'>")]
	Empty(JobId),
	#[error("operation of '{stream}' doesn't belong to the job stream '{job_stream}'")]
	ForeignOperation { stream: String, job_stream: String },
	#[error(
		"excessive reshuffle: {conflicting} conflicting operations exceed the threshold of {threshold}"
	)]
	ExcessiveReshuffle { conflicting: u64, threshold: u64 },
	#[error("job attempt timed out after {0:?}")]
	Timeout(Duration),
	#[error("job cancelled")]
	Cancelled,
	#[error("job not found <id='{0}'>")]
	NotFound(JobId),
	#[error(transparent)]
	Reducer(#[from] ReducerError),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Cache(#[from] CacheError),
	#[error(transparent)]
	Queue(#[from] QueueError),
}

impl JobError {
	/// Whether another attempt of the same job could succeed.
	#[must_use]
	pub const fn is_retryable(&self) -> bool {
		match self {
			Self::Timeout(_) => true,
			Self::Reducer(e) => e.is_transient(),
			Self::Storage(e) => e.is_transient(),
			Self::Cache(e) => e.is_transient(),
			Self::UnknownDocumentType(_)
			| Self::ScopeMismatch { .. }
			| Self::Empty(_)
			| Self::ForeignOperation { .. }
			| Self::ExcessiveReshuffle { .. }
			| Self::Cancelled
			| Self::NotFound(_)
			| Self::Queue(_) => false,
		}
	}
}
