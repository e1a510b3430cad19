mod common;

use std::{sync::Arc, time::Duration};

use common::{database, increment, key, registry, COUNTER};
use reactor_core::{
	config::{CacheConfig, ExecutorConfig},
	infra::{
		cache::WriteCache,
		event::EventBus,
		job::{ExecutorManager, Job, JobAwaiter, JobExecutor, JobStatus, JobTracker},
		queue::{JobQueue, Queue},
		store::{DbKeyframeStore, Keyframe, KeyframeStore, OperationStore, StorageError},
		stream::StreamKey,
	},
};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Keyframe store that takes its time to write.
struct SlowKeyframes {
	inner: DbKeyframeStore,
	delay: Duration,
}

#[async_trait]
impl KeyframeStore for SlowKeyframes {
	async fn put_keyframe(
		&self,
		key: &StreamKey,
		document_type: &str,
		revision: u64,
		state: &Value,
		signal: Option<&CancellationToken>,
	) -> Result<(), StorageError> {
		tokio::time::sleep(self.delay).await;
		self.inner
			.put_keyframe(key, document_type, revision, state, signal)
			.await
	}

	async fn find_nearest_keyframe(
		&self,
		key: &StreamKey,
		target_revision: u64,
		signal: Option<&CancellationToken>,
	) -> Result<Option<Keyframe>, StorageError> {
		self.inner
			.find_nearest_keyframe(key, target_revision, signal)
			.await
	}

	async fn delete_keyframes(
		&self,
		document_id: &str,
		scope: Option<&str>,
		branch: Option<&str>,
		signal: Option<&CancellationToken>,
	) -> Result<u64, StorageError> {
		self.inner
			.delete_keyframes(document_id, scope, branch, signal)
			.await
	}
}

#[tokio::test]
async fn slow_keyframe_writes_do_not_replay_committed_jobs() {
	let (_dir, db) = database().await;
	let registry = registry();
	let operations = OperationStore::new(db.clone());
	let keyframes = Arc::new(SlowKeyframes {
		inner: DbKeyframeStore::new(db.clone()),
		delay: Duration::from_millis(300),
	});

	let store: Arc<dyn KeyframeStore> = Arc::<SlowKeyframes>::clone(&keyframes);

	let cache = Arc::new(WriteCache::new(
		CacheConfig {
			keyframe_interval: 1,
			..Default::default()
		},
		operations.clone(),
		store,
		Arc::clone(&registry),
	));

	let queue: Arc<dyn Queue> = Arc::new(JobQueue::new());
	let manager = ExecutorManager::new(
		ExecutorConfig {
			job_timeout_ms: 100,
			max_retries: 2,
			retry_base_delay_ms: 5,
			retry_max_delay_ms: 20,
			..Default::default()
		},
		queue,
		Arc::new(JobExecutor::new(db.clone(), registry, cache)),
		EventBus::default(),
		Arc::new(JobTracker::new()),
	);
	manager.start().await;

	let key = key("doc-1");
	let job = manager
		.submit(Job::new(key.clone(), COUNTER, vec![increment(1)]))
		.await
		.expect("submit");

	let info = manager.wait_for_job(job.id, None).await.expect("wait");
	assert_eq!(info.status, JobStatus::Completed);
	assert_eq!(info.attempts, 1);
	assert_eq!(info.operations.len(), 1);

	let stored = operations
		.operations_of_job(job.id.into())
		.await
		.expect("read");
	assert_eq!(stored, info.operations);
	assert_eq!(operations.revision(&key).await.expect("revision"), 1);

	let keyframe = keyframes
		.find_nearest_keyframe(&key, 1, None)
		.await
		.expect("find")
		.expect("keyframe");
	assert_eq!(keyframe.state, json!({ "count": 1 }));

	assert!(manager.stop().await.is_graceful());
}
