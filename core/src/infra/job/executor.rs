use std::{collections::HashSet, sync::Arc};

use reactor_sync::{reshuffle_by_timestamp, state_hash, Action, OpId, Operation, OperationIndex};

use async_trait::async_trait;
use sea_orm::TransactionTrait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
	domain::{DocumentModelRegistry, Reducer, ReducerError},
	infra::{
		cache::WriteCache,
		db::Database,
		store::{OperationStore, SnapshotStore, StorageError},
		stream::StreamKey,
	},
};

use super::{Job, JobError};

pub const DEFAULT_MAX_SKIP_THRESHOLD: u64 = 1_000;

/// Runs a single attempt of a job.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
	/// Applies `job` and commits the resulting operations, or nothing at all.
	///
	/// Running an attempt again for a job that already committed returns its operations without
	/// writing anything.
	async fn execute(&self, job: &Job, cancel: &CancellationToken)
		-> Result<Vec<Operation>, JobError>;

	/// Follow-up work once `operations` are committed. Not bound by the attempt timeout and
	/// unable to fail the job.
	async fn after_commit(&self, _job: &Job, _operations: &[Operation]) {}
}

/// One step of a job: an action and the position its operation gets.
struct Step {
	action: Action,
	position: OperationIndex,
	timestamp_utc_ms: i64,
}

/// Applies actions through the registered reducers and commits operations and snapshot in a
/// single transaction.
#[derive(Debug, Clone)]
pub struct JobExecutor {
	db: Database,
	operations: OperationStore,
	registry: Arc<DocumentModelRegistry>,
	cache: Arc<WriteCache>,
	max_skip_threshold: u64,
}

impl JobExecutor {
	pub fn new(
		db: Database,
		registry: Arc<DocumentModelRegistry>,
		cache: Arc<WriteCache>,
	) -> Self {
		Self {
			operations: OperationStore::new(db.clone()),
			db,
			registry,
			cache,
			max_skip_threshold: DEFAULT_MAX_SKIP_THRESHOLD,
		}
	}

	#[must_use]
	pub const fn with_max_skip_threshold(mut self, max_skip_threshold: u64) -> Self {
		self.max_skip_threshold = max_skip_threshold;
		self
	}

	/// Steps of a regular job, appended after the current head.
	fn plan_actions(job: &Job, head: Option<&Operation>) -> Result<Vec<Step>, JobError> {
		let next = head.map_or(0, |op| op.index + 1);

		job.actions
			.iter()
			.zip(next..)
			.map(|(action, index)| {
				if action.scope != job.key.scope {
					return Err(JobError::ScopeMismatch {
						action_scope: action.scope.clone(),
						job_scope: job.key.scope.clone(),
					});
				}

				Ok(Step {
					action: action.clone(),
					position: OperationIndex::new(index, 0),
					timestamp_utc_ms: action.timestamp_utc_ms,
				})
			})
			.collect()
	}

	/// Steps of a load job.
	///
	/// Local operations written since the earliest incoming timestamp are reshuffled together with
	/// the incoming ones and appended after the head. The first appended operation skips over the
	/// whole conflicting tail, so replaying the log hides the old positions.
	///
	/// Returns the revision whose state the steps apply to, `None` when every incoming operation
	/// is already part of the history.
	async fn plan_load(
		&self,
		job: &Job,
		head: Option<&Operation>,
	) -> Result<Option<(u64, Vec<Step>)>, JobError> {
		if let Some(stray) = job
			.operations
			.iter()
			.find(|op| !job.key.contains(op) || op.document_type != job.document_type)
		{
			return Err(JobError::ForeignOperation {
				stream: StreamKey::of(stray).to_string(),
				job_stream: job.key.to_string(),
			});
		}

		let latest = head.map_or(0, |op| op.index + 1);
		let since = job
			.operations
			.iter()
			.map(|op| op.timestamp_utc_ms)
			.min()
			.unwrap_or(i64::MAX);

		let threshold = self.max_skip_threshold;
		let conflicting = self
			.operations
			.operations_after_timestamp(
				&job.key,
				since,
				usize::try_from(threshold.saturating_add(1)).unwrap_or(usize::MAX),
			)
			.await?;

		let count = u64::try_from(conflicting.len()).unwrap_or(u64::MAX);
		if count > threshold {
			return Err(JobError::ExcessiveReshuffle {
				conflicting: count,
				threshold,
			});
		}

		let tail = match conflicting.first() {
			Some(first) => {
				self.operations
					.operations_since(&job.key, first.index, None)
					.await?
			}
			None => Vec::new(),
		};

		let skip = tail.first().map_or(0, |first| latest - first.index);
		if skip > threshold {
			return Err(JobError::ExcessiveReshuffle {
				conflicting: skip,
				threshold,
			});
		}

		// operations already undone by a later one in the tail are not replayed
		let existing = tail
			.iter()
			.filter(|op| {
				!tail.iter().any(|later| {
					later.index > op.index
						&& later.skip > 0
						&& later.index.saturating_sub(later.skip) <= op.index
				})
			})
			.cloned()
			.collect::<Vec<_>>();

		let mut seen = existing
			.iter()
			.map(|op| op.action.id)
			.collect::<HashSet<_>>();
		let incoming = job
			.operations
			.iter()
			.filter(|op| seen.insert(op.action.id))
			.cloned()
			.collect::<Vec<_>>();

		if incoming.is_empty() {
			return Ok(None);
		}

		debug!(
			job_id = %job.id,
			key = %job.key,
			incoming = incoming.len(),
			reshuffled = existing.len(),
			skip,
			"Reshuffling loaded operations",
		);

		let steps = reshuffle_by_timestamp(OperationIndex::new(latest, skip), existing, incoming)
			.into_iter()
			.map(|op| Step {
				position: OperationIndex::new(op.index, op.skip),
				timestamp_utc_ms: op.timestamp_utc_ms,
				action: op.action,
			})
			.collect();

		Ok(Some((latest - skip, steps)))
	}

	/// Reduces `steps` on top of `state`, chaining the resulting operations after `head`.
	async fn reduce(
		job: &Job,
		reducer: &dyn Reducer,
		mut state: Value,
		head: Option<&Operation>,
		steps: Vec<Step>,
		cancel: &CancellationToken,
	) -> Result<(Vec<Operation>, Value), JobError> {
		let mut prev_op_id = head.map(|op| op.op_id.clone());
		let mut operations = Vec::with_capacity(steps.len());

		for Step {
			action,
			position,
			timestamp_utc_ms,
		} in steps
		{
			if cancel.is_cancelled() {
				return Err(JobError::Cancelled);
			}

			let error = match reducer.reduce(state.clone(), &action).await {
				Ok(next) => {
					state = next;
					None
				}
				Err(ReducerError::Rejected(reason)) => {
					warn!(
						job_id = %job.id,
						key = %job.key,
						action_id = %action.id,
						action_type = %action.action_type,
						%reason,
						"Action rejected, recording failed operation",
					);
					Some(reason)
				}
				Err(e @ ReducerError::Transient(_)) => return Err(e.into()),
			};

			let mut op = Operation {
				op_id: OpId::from(String::new()),
				prev_op_id: prev_op_id.take(),
				job_id: Some(job.id.into()),
				document_id: job.key.document_id.clone(),
				document_type: job.document_type.clone(),
				scope: job.key.scope.clone(),
				branch: job.key.branch.clone(),
				index: position.index,
				skip: position.skip,
				timestamp_utc_ms,
				action,
				error,
				hash: state_hash(&state),
			};
			op.op_id = op.expected_op_id();

			prev_op_id = Some(op.op_id.clone());
			operations.push(op);
		}

		Ok((operations, state))
	}
}

#[async_trait]
impl Executor for JobExecutor {
	async fn execute(
		&self,
		job: &Job,
		cancel: &CancellationToken,
	) -> Result<Vec<Operation>, JobError> {
		if job.actions.is_empty() && job.operations.is_empty() {
			return Err(JobError::Empty(job.id));
		}

		let reducer = self
			.registry
			.get(&job.document_type)
			.ok_or_else(|| JobError::UnknownDocumentType(job.document_type.clone()))?;

		// an earlier attempt may have committed right before timing out
		let committed = OperationStore::operations_of_job_in(self.db.conn(), job.id.into()).await?;
		if !committed.is_empty() {
			info!(
				job_id = %job.id,
				key = %job.key,
				operations = committed.len(),
				"Job already committed by an earlier attempt",
			);
			return Ok(committed);
		}

		let head = OperationStore::head_in(self.db.conn(), &job.key).await?;

		let (revision, steps) = if job.is_load() {
			match self.plan_load(job, head.as_ref()).await? {
				Some(plan) => plan,
				None => {
					debug!(job_id = %job.id, key = %job.key, "Nothing new to load");
					return Ok(Vec::new());
				}
			}
		} else {
			(
				head.as_ref().map_or(0, |op| op.index + 1),
				Self::plan_actions(job, head.as_ref())?,
			)
		};

		let base = self
			.cache
			.get_state(&job.key, &job.document_type, Some(revision), Some(cancel))
			.await?;

		let (operations, state) = Self::reduce(
			job,
			reducer.as_ref(),
			base.state,
			head.as_ref(),
			steps,
			cancel,
		)
		.await?;

		let Some(last) = operations.last() else {
			return Err(JobError::Empty(job.id));
		};

		// from here on the attempt either commits entirely or not at all
		if cancel.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let txn = self.db.conn().begin().await.map_err(StorageError::from)?;
		OperationStore::append_in(&txn, &operations).await?;
		SnapshotStore::put_in(&txn, &job.document_type, state.clone(), last).await?;
		txn.commit().await.map_err(StorageError::from)?;

		debug!(
			job_id = %job.id,
			key = %job.key,
			operations = operations.len(),
			head_index = last.index,
			"Job committed",
		);

		if job.is_load() {
			// cached revisions past the reshuffle point no longer describe the history
			self.cache.invalidate(&job.key);
		}
		self.cache.put_state(&job.key, last.index + 1, state);

		Ok(operations)
	}

	async fn after_commit(&self, job: &Job, operations: &[Operation]) {
		if let Some(last) = operations.last() {
			self.cache
				.persist_keyframe(&job.key, &job.document_type, last.index + 1)
				.await;
		}
	}
}
