//! The reactor wires queue, executors, storage and replication together.

use std::sync::Arc;

use reactor_sync::{Action, Operation};

use tracing::info;

use crate::{
	config::ReactorConfig,
	domain::DocumentModelRegistry,
	error::{Error, Result},
	infra::{
		cache::{CachedState, WriteCache},
		db::Database,
		event::{EventBus, Subscription},
		job::{
			ExecutorManager, ExecutorStats, Job, JobError, JobExecutor, JobInfo, JobTracker,
			ShutdownStatus,
		},
		queue::{JobQueue, Queue},
		store::{
			DbKeyframeStore, DbListenerStorage, DocumentSnapshot, KeyframeStore, OperationStore,
			SampledKeyframeStore, SnapshotStore,
		},
		stream::StreamKey,
	},
	service::sync::SyncManager,
};

pub struct Reactor {
	config: ReactorConfig,
	db: Database,
	events: EventBus,
	queue: Arc<JobQueue>,
	registry: Arc<DocumentModelRegistry>,
	operations: OperationStore,
	snapshots: SnapshotStore,
	keyframes: Arc<dyn KeyframeStore>,
	cache: Arc<WriteCache>,
	manager: ExecutorManager,
	sync: Arc<SyncManager>,
	sync_subscription: Subscription,
}

impl std::fmt::Debug for Reactor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Reactor")
			.field("registry", &self.registry)
			.field("manager", &self.manager)
			.finish_non_exhaustive()
	}
}

impl Reactor {
	/// Opens (and migrates) the configured database, the reactor is not started yet.
	pub async fn new(config: ReactorConfig, registry: Arc<DocumentModelRegistry>) -> Result<Self> {
		config.validate()?;
		let db = Database::open(&config.database_url).await?;

		Ok(Self::with_database(config, db, registry))
	}

	#[must_use]
	pub fn with_database(
		config: ReactorConfig,
		db: Database,
		registry: Arc<DocumentModelRegistry>,
	) -> Self {
		let events = EventBus::default();
		let queue = Arc::new(JobQueue::new());
		let operations = OperationStore::new(db.clone());
		let snapshots = SnapshotStore::new(db.clone());

		let keyframes: Arc<dyn KeyframeStore> = match config.cache.keyframe_sample_every {
			0 => Arc::new(DbKeyframeStore::new(db.clone())),
			every => Arc::new(SampledKeyframeStore::new(
				DbKeyframeStore::new(db.clone()),
				every,
			)),
		};

		let cache = Arc::new(WriteCache::new(
			config.cache.clone(),
			operations.clone(),
			Arc::clone(&keyframes),
			Arc::clone(&registry),
		));

		let jobs: Arc<dyn Queue> = Arc::<JobQueue>::clone(&queue);
		let manager = ExecutorManager::new(
			config.executor.clone(),
			jobs,
			Arc::new(
				JobExecutor::new(db.clone(), Arc::clone(&registry), Arc::clone(&cache))
					.with_max_skip_threshold(config.executor.max_skip_threshold),
			),
			events.clone(),
			Arc::new(JobTracker::new()),
		);

		let sync = Arc::new(SyncManager::new(
			config.sync.clone(),
			operations.clone(),
			Arc::new(DbListenerStorage::new(
				db.clone(),
				config.sync.max_revisions_per_ack,
			)),
			events.clone(),
		));
		let sync_subscription = sync.attach();

		Self {
			config,
			db,
			events,
			queue,
			registry,
			operations,
			snapshots,
			keyframes,
			cache,
			manager,
			sync,
			sync_subscription,
		}
	}

	pub async fn start(&self) {
		self.manager.start().await;
	}

	/// Stops the executors, then detaches replication from the event bus.
	pub async fn stop(&self) -> ShutdownStatus {
		let status = self.manager.stop().await;
		self.sync_subscription.unsubscribe();
		info!(?status, "Reactor stopped");
		status
	}

	/// Queues `actions` for the stream `(document_id, scope of the actions, branch)`.
	///
	/// Every action must target the same scope.
	pub async fn execute(
		&self,
		document_type: &str,
		document_id: &str,
		branch: &str,
		actions: Vec<Action>,
	) -> Result<JobInfo> {
		let Some(scope) = actions.first().map(|action| action.scope.clone()) else {
			return Err(Error::NoActions);
		};

		if let Some(stray) = actions.iter().find(|action| action.scope != scope) {
			return Err(JobError::ScopeMismatch {
				action_scope: stray.scope.clone(),
				job_scope: scope,
			}
			.into());
		}

		self.submit(Job::new(
			StreamKey::new(document_id, scope, branch),
			document_type,
			actions,
		))
		.await
	}

	/// Queues operations received from another replica.
	///
	/// The operations are reshuffled by timestamp with the local operations written since the
	/// earliest of them, and the result is appended to the local history.
	pub async fn load(&self, operations: Vec<Operation>) -> Result<JobInfo> {
		let Some(first) = operations.first() else {
			return Err(Error::NoOperations);
		};

		let key = StreamKey::of(first);
		let document_type = first.document_type.clone();

		if let Some(stray) = operations
			.iter()
			.find(|op| !key.contains(op) || op.document_type != document_type)
		{
			return Err(JobError::ForeignOperation {
				stream: StreamKey::of(stray).to_string(),
				job_stream: key.to_string(),
			}
			.into());
		}

		self.submit(Job::load(key, document_type, operations)).await
	}

	/// Queues a prepared job, for instance one carrying a queue hint.
	pub async fn submit(&self, job: Job) -> Result<JobInfo> {
		Ok(self.manager.submit(job).await?)
	}

	/// Current snapshot of `key`, `None` if the stream has no operations.
	///
	/// A missing, invalidated or stale snapshot is rebuilt from the log and stored again.
	pub async fn snapshot(&self, key: &StreamKey) -> Result<Option<DocumentSnapshot>> {
		let Some(head) = self.operations.head(key).await? else {
			return Ok(None);
		};

		if let Some(snapshot) = self.snapshots.get_fresh(key, Some(&head)).await? {
			return Ok(Some(snapshot));
		}

		let state = self
			.cache
			.get_state(key, &head.document_type, Some(head.index + 1), None)
			.await?;
		let snapshot = self
			.snapshots
			.put(&head.document_type, state.state, &head)
			.await?;

		info!(%key, revision = state.revision, "Snapshot rebuilt from the log");

		Ok(Some(snapshot))
	}

	/// State of `key` at `revision` (or now), rebuilt from keyframes and the log when not cached.
	pub async fn state_at(
		&self,
		key: &StreamKey,
		document_type: &str,
		revision: Option<u64>,
	) -> Result<CachedState> {
		Ok(self
			.cache
			.get_state(key, document_type, revision, None)
			.await?)
	}

	#[must_use]
	pub const fn config(&self) -> &ReactorConfig {
		&self.config
	}

	#[must_use]
	pub const fn db(&self) -> &Database {
		&self.db
	}

	#[must_use]
	pub const fn events(&self) -> &EventBus {
		&self.events
	}

	#[must_use]
	pub fn queue(&self) -> &dyn Queue {
		self.queue.as_ref()
	}

	#[must_use]
	pub const fn registry(&self) -> &Arc<DocumentModelRegistry> {
		&self.registry
	}

	#[must_use]
	pub const fn operations(&self) -> &OperationStore {
		&self.operations
	}

	#[must_use]
	pub const fn snapshots(&self) -> &SnapshotStore {
		&self.snapshots
	}

	#[must_use]
	pub fn keyframes(&self) -> &dyn KeyframeStore {
		self.keyframes.as_ref()
	}

	#[must_use]
	pub const fn sync(&self) -> &Arc<SyncManager> {
		&self.sync
	}

	#[must_use]
	pub fn tracker(&self) -> &Arc<JobTracker> {
		self.manager.tracker()
	}

	#[must_use]
	pub fn stats(&self) -> ExecutorStats {
		self.manager.stats()
	}
}
