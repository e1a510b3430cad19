//! Listener replication
//!
//! Push listeners get every committed operation matching their filter delivered through their
//! [`SyncTarget`], their cursor only moves once the target accepted the batch. Pull listeners
//! read operations after their cursor and move it themselves through
//! [`SyncManager::acknowledge`]. Either way delivery is at-least-once.

use std::{
	collections::{HashMap, HashSet},
	fmt,
	sync::{Arc, PoisonError, RwLock, Weak},
};

use reactor_sync::Operation;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
	config::SyncConfig,
	infra::{
		event::{EventBus, EventHandler, EventType, HandlerError, ReactorEvent, Subscription},
		job::JobId,
		store::{
			AcknowledgeOutcome, ListenerMode, ListenerRevision, ListenerState, ListenerStorage,
			OperationStore, StorageError,
		},
		stream::StreamKey,
	},
};

mod target;

pub use target::{ChannelTarget, SyncTarget};

#[derive(Debug, Error)]
pub enum SyncError {
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("listener not found: <parent='{parent_id}', listener='{listener_id}'>")]
	ListenerNotFound {
		parent_id: String,
		listener_id: String,
	},
	#[error("no sync target registered for listener <id='{0}'>")]
	NoTarget(String),
	#[error("transport failed: {0}")]
	Transport(String),
}

type ListenerKey = (String, String);

/// Operations to hand to a listener, and the cursors they move it to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
	pub operations: Vec<Operation>,
	pub revisions: Vec<ListenerRevision>,
}

impl SyncBatch {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}
}

pub struct SyncManager {
	config: SyncConfig,
	operations: OperationStore,
	listeners: Arc<dyn ListenerStorage>,
	targets: RwLock<HashMap<ListenerKey, Arc<dyn SyncTarget>>>,
	events: EventBus,
}

impl fmt::Debug for SyncManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncManager")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl SyncManager {
	pub fn new(
		config: SyncConfig,
		operations: OperationStore,
		listeners: Arc<dyn ListenerStorage>,
		events: EventBus,
	) -> Self {
		Self {
			config,
			operations,
			listeners,
			targets: RwLock::default(),
			events,
		}
	}

	#[must_use]
	pub fn listeners(&self) -> &Arc<dyn ListenerStorage> {
		&self.listeners
	}

	/// Pushes committed operations to matching push listeners on every `JOB_COMPLETED`.
	pub fn attach(self: &Arc<Self>) -> Subscription {
		self.events.subscribe(
			EventType::JobCompleted,
			PushOnCommit {
				manager: Arc::downgrade(self),
			},
		)
	}

	/// Registers a listener, with the transport to push to when it is a push listener.
	pub async fn add_listener(
		&self,
		state: &ListenerState,
		target: Option<Arc<dyn SyncTarget>>,
	) -> Result<(), SyncError> {
		self.listeners.add_listener(state).await?;

		if let Some(target) = target {
			self.set_target(&state.parent_id, &state.listener_id, target);
		}

		info!(
			parent_id = %state.parent_id,
			listener_id = %state.listener_id,
			mode = ?state.mode,
			"Listener registered",
		);

		Ok(())
	}

	pub async fn remove_listener(
		&self,
		parent_id: &str,
		listener_id: &str,
	) -> Result<bool, SyncError> {
		self.targets
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&(parent_id.to_string(), listener_id.to_string()));

		Ok(self.listeners.remove_listener(parent_id, listener_id).await?)
	}

	/// Replaces the transport of a listener, for instance after it reconnected.
	pub fn set_target(&self, parent_id: &str, listener_id: &str, target: Arc<dyn SyncTarget>) {
		self.targets
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert((parent_id.to_string(), listener_id.to_string()), target);
	}

	fn target(&self, parent_id: &str, listener_id: &str) -> Option<Arc<dyn SyncTarget>> {
		self.targets
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&(parent_id.to_string(), listener_id.to_string()))
			.map(Arc::clone)
	}

	async fn listener(&self, parent_id: &str, listener_id: &str) -> Result<ListenerState, SyncError> {
		self.listeners
			.get_listener(parent_id, listener_id)
			.await?
			.ok_or_else(|| SyncError::ListenerNotFound {
				parent_id: parent_id.to_string(),
				listener_id: listener_id.to_string(),
			})
	}

	fn batch_size(&self) -> usize {
		usize::try_from(self.config.pull_batch_size)
			.unwrap_or(usize::MAX)
			.max(1)
	}

	/// Operations after the listener's cursors that match its filter, at most one pull batch.
	async fn collect(
		&self,
		listener: &ListenerState,
		streams: Option<&HashSet<StreamKey>>,
	) -> Result<SyncBatch, SyncError> {
		let limit = self.batch_size();
		let mut batch = SyncBatch::default();

		let keys = match streams {
			Some(streams) => {
				let mut keys = streams.iter().cloned().collect::<Vec<_>>();
				keys.sort();
				keys
			}
			None => self.operations.list_streams().await?,
		};

		for key in keys {
			if batch.operations.len() >= limit {
				break;
			}

			if !listener.filter.matches_stream(&key) {
				continue;
			}

			let operations = self
				.operations
				.operations_since(
					&key,
					listener.cursor(&key),
					Some(limit - batch.operations.len()),
				)
				.await?;

			let Some(last) = operations.last() else {
				continue;
			};

			if !listener.filter.matches(&key, &last.document_type) {
				continue;
			}

			batch
				.revisions
				.push(ListenerRevision::new(key, last.index + 1));
			batch.operations.extend(operations);
		}

		Ok(batch)
	}

	/// Operations a pull listener hasn't acknowledged yet. The cursor doesn't move until the
	/// listener acknowledges them.
	pub async fn pull(&self, parent_id: &str, listener_id: &str) -> Result<SyncBatch, SyncError> {
		let listener = self.listener(parent_id, listener_id).await?;
		let sync_id = Uuid::new_v4();

		self.emit(ReactorEvent::SyncPending {
			sync_id,
			job_id: None,
			listener_id: listener_id.to_string(),
		})
		.await;

		match self.collect(&listener, None).await {
			Ok(batch) => {
				self.emit(ReactorEvent::SyncSucceeded {
					sync_id,
					job_id: None,
					listener_id: listener_id.to_string(),
					operations: batch.operations.len(),
				})
				.await;
				Ok(batch)
			}
			Err(e) => {
				self.emit(ReactorEvent::SyncFailed {
					sync_id,
					job_id: None,
					listener_id: listener_id.to_string(),
					error: e.to_string(),
				})
				.await;
				Err(e)
			}
		}
	}

	pub async fn acknowledge(
		&self,
		parent_id: &str,
		listener_id: &str,
		revisions: &[ListenerRevision],
		signal: Option<&CancellationToken>,
	) -> Result<Vec<AcknowledgeOutcome>, SyncError> {
		let outcomes = self
			.listeners
			.acknowledge(parent_id, listener_id, revisions, signal)
			.await?;

		debug!(
			%parent_id,
			%listener_id,
			advanced = outcomes.iter().filter(|outcome| outcome.advanced).count(),
			"Listener acknowledged",
		);

		Ok(outcomes)
	}

	/// Pushes everything after the listener's cursors to its target, returns how many operations
	/// were delivered.
	pub async fn push_pending(
		&self,
		parent_id: &str,
		listener_id: &str,
	) -> Result<usize, SyncError> {
		let listener = self.listener(parent_id, listener_id).await?;
		self.push(&listener, None, None).await
	}

	async fn push(
		&self,
		listener: &ListenerState,
		job_id: Option<JobId>,
		streams: Option<&HashSet<StreamKey>>,
	) -> Result<usize, SyncError> {
		let listener_id = listener.listener_id.clone();

		let batch = self.collect(listener, streams).await?;
		if batch.is_empty() {
			return Ok(0);
		}

		let sync_id = Uuid::new_v4();
		self.emit(ReactorEvent::SyncPending {
			sync_id,
			job_id,
			listener_id: listener_id.clone(),
		})
		.await;

		let res = async {
			let target = self
				.target(&listener.parent_id, &listener.listener_id)
				.ok_or_else(|| SyncError::NoTarget(listener_id.clone()))?;

			target.push(&batch.operations).await?;

			self.listeners
				.acknowledge(
					&listener.parent_id,
					&listener.listener_id,
					&batch.revisions,
					None,
				)
				.await?;

			Ok::<_, SyncError>(batch.operations.len())
		}
		.await;

		match res {
			Ok(operations) => {
				debug!(%sync_id, %listener_id, operations, "Pushed operations");
				self.emit(ReactorEvent::SyncSucceeded {
					sync_id,
					job_id,
					listener_id,
					operations,
				})
				.await;
				Ok(operations)
			}
			Err(e) => {
				warn!(%sync_id, %listener_id, %e, "Push failed, cursor left in place");
				self.emit(ReactorEvent::SyncFailed {
					sync_id,
					job_id,
					listener_id,
					error: e.to_string(),
				})
				.await;
				Err(e)
			}
		}
	}

	/// Pushes the streams touched by a committed job to every push listener interested in them.
	pub async fn on_job_completed(&self, job_id: JobId, operations: &[Operation]) {
		let streams = operations.iter().map(StreamKey::of).collect::<HashSet<_>>();

		let parents = match self.listeners.get_parents().await {
			Ok(parents) => parents,
			Err(e) => {
				warn!(%job_id, %e, "Failed to list listener parents");
				return;
			}
		};

		for parent_id in parents {
			let listeners = match self.listeners.get_listeners(&parent_id).await {
				Ok(listeners) => listeners,
				Err(e) => {
					warn!(%job_id, %parent_id, %e, "Failed to list listeners");
					continue;
				}
			};

			for listener in listeners {
				if listener.mode != ListenerMode::Push
					|| !operations
						.iter()
						.any(|op| listener.filter.matches(&StreamKey::of(op), &op.document_type))
				{
					continue;
				}

				// failures are reported through SYNC_FAILED and retried on the next push
				let _ = self.push(&listener, Some(job_id), Some(&streams)).await;
			}
		}
	}

	async fn emit(&self, event: ReactorEvent) {
		if let Err(e) = self.events.emit(event).await {
			warn!(%e, "Sync event handlers failed");
		}
	}
}

struct PushOnCommit {
	manager: Weak<SyncManager>,
}

#[async_trait]
impl EventHandler for PushOnCommit {
	async fn handle(&self, event: &ReactorEvent) -> Result<(), HandlerError> {
		if let (
			Some(manager),
			ReactorEvent::JobCompleted {
				job_id, operations, ..
			},
		) = (self.manager.upgrade(), event)
		{
			manager.on_job_completed(*job_id, operations).await;
		}

		Ok(())
	}
}
