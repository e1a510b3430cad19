//! Storage of the operation log and of everything derived from it
//!
//! The operation log is the only source of truth. Snapshots and keyframes are caches that can
//! always be rebuilt from it, listener state is cursor bookkeeping only.

use reactor_sync::ReactorSyncError;
use reactor_utils::db::CorruptedFieldError;

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

mod keyframe;
mod listener;
mod operation;
mod snapshot;

pub use keyframe::{DbKeyframeStore, Keyframe, KeyframeStore, SampledKeyframeStore};
pub use listener::{
	AcknowledgeOutcome, CallInfo, DbListenerStorage, ListenerFilter, ListenerRevision,
	ListenerState, ListenerStorage,
};
pub use operation::OperationStore;
pub use snapshot::{DocumentSnapshot, SnapshotStore};

pub use super::db::entities::listener::ListenerMode;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("database error: {0}")]
	Database(#[from] DbErr),
	#[error("failed to run migrations: {0}")]
	Migration(#[source] DbErr),
	#[error("failed to (de)serialize stored data: {0}")]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	CorruptedField(#[from] CorruptedFieldError),
	#[error(transparent)]
	Chain(#[from] ReactorSyncError),
	#[error("operation index {index} does not advance the head of {key} (head: {head:?})")]
	RevisionMismatch {
		key: String,
		head: Option<u64>,
		index: u64,
	},
	#[error("conflicting operation in {key} at index {index}")]
	Conflict { key: String, index: u64 },
	#[error("operations of a single append must belong to one stream, got {0}")]
	MixedStreams(String),
	#[error("listener not found: <parent='{parent_id}', listener='{listener_id}'>")]
	ListenerNotFound {
		parent_id: String,
		listener_id: String,
	},
	#[error("listener already exists: <parent='{parent_id}', listener='{listener_id}'>")]
	ListenerExists {
		parent_id: String,
		listener_id: String,
	},
	#[error("too many revisions in one acknowledgement: {received} (max {max})")]
	TooManyRevisions { received: usize, max: usize },
	#[error("Operation aborted")]
	Aborted,
}

impl StorageError {
	/// Whether retrying the same write later could succeed.
	#[must_use]
	pub const fn is_transient(&self) -> bool {
		matches!(
			self,
			Self::Database(_) | Self::RevisionMismatch { .. } | Self::Conflict { .. }
		)
	}

	/// Maps unique constraint violations of an insert to [`StorageError::Conflict`].
	pub(crate) fn on_insert(err: DbErr, key: &impl ToString, index: u64) -> Self {
		match err.sql_err() {
			Some(SqlErr::UniqueConstraintViolation(_)) => Self::Conflict {
				key: key.to_string(),
				index,
			},
			_ => Self::Database(err),
		}
	}
}

/// Fails with [`StorageError::Aborted`] once `signal` was cancelled.
pub(crate) fn check_aborted(signal: Option<&CancellationToken>) -> Result<(), StorageError> {
	if signal.is_some_and(CancellationToken::is_cancelled) {
		Err(StorageError::Aborted)
	} else {
		Ok(())
	}
}
