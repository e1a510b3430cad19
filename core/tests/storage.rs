mod common;

use common::{database, key, operations, COUNTER};
use reactor_core::{
	infra::store::{OperationStore, SnapshotStore, StorageError},
	infra::stream::StreamKey,
};

use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn append_extends_the_chain() {
	let (_dir, db) = database().await;
	let store = OperationStore::new(db);
	let key = key("doc-1");

	assert_eq!(store.revision(&key).await.expect("revision"), 0);
	assert!(store.head(&key).await.expect("head").is_none());

	let first = operations(&key, None, 3);
	store.append(&first).await.expect("append");

	let second = operations(&key, first.last(), 2);
	store.append(&second).await.expect("append");

	assert_eq!(store.revision(&key).await.expect("revision"), 5);

	let stored = store.operations_since(&key, 0, None).await.expect("read");
	assert_eq!(
		stored.iter().map(|op| op.index).collect::<Vec<_>>(),
		vec![0, 1, 2, 3, 4]
	);
	assert_eq!(stored[3].prev_op_id.as_ref(), Some(&stored[2].op_id));
	assert_eq!(stored, [first, second].concat());

	let between = store.operations_between(&key, 1, 3).await.expect("read");
	assert_eq!(between.iter().map(|op| op.index).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn append_rejects_stale_writers() {
	let (_dir, db) = database().await;
	let store = OperationStore::new(db);
	let key = key("doc-1");

	let first = operations(&key, None, 2);
	store.append(&first).await.expect("append");

	// computed against an outdated head
	let stale = operations(&key, None, 1);
	assert!(matches!(
		store.append(&stale).await,
		Err(StorageError::RevisionMismatch { head: Some(1), index: 0, .. })
	));

	// right position, wrong link
	let mut unlinked = operations(&key, first.last(), 1);
	unlinked[0].prev_op_id = Some(first[0].op_id.clone());
	assert!(matches!(
		store.append(&unlinked).await,
		Err(StorageError::Chain(_))
	));

	assert_eq!(store.revision(&key).await.expect("revision"), 2);
}

#[tokio::test]
async fn append_rejects_duplicate_positions() {
	let (_dir, db) = database().await;
	let store = OperationStore::new(db);
	let key = key("doc-1");

	let mut ops = operations(&key, None, 2);
	ops[1].index = 0;

	let res = store.append(&ops).await;
	assert!(matches!(res, Err(StorageError::Conflict { index: 0, .. })));
	assert!(res.expect_err("conflict").is_transient());
	assert_eq!(store.revision(&key).await.expect("revision"), 0);
}

#[tokio::test]
async fn append_rejects_mixed_streams() {
	let (_dir, db) = database().await;
	let store = OperationStore::new(db);

	let mut ops = operations(&key("doc-1"), None, 1);
	ops.extend(operations(&key("doc-2"), None, 1));

	assert!(matches!(
		store.append(&ops).await,
		Err(StorageError::MixedStreams(_))
	));
}

#[tokio::test]
async fn streams_and_revisions_are_tracked_per_scope() {
	let (_dir, db) = database().await;
	let store = OperationStore::new(db);

	let global = key("doc-1");
	let local = StreamKey::new("doc-1", "local", "main");
	let other_branch = StreamKey::new("doc-1", "global", "draft");

	store
		.append(&operations(&global, None, 4))
		.await
		.expect("append");
	store
		.append(&operations(&local, None, 2))
		.await
		.expect("append");
	store
		.append(&operations(&other_branch, None, 7))
		.await
		.expect("append");

	let revisions = store.get_revisions("doc-1", "main").await.expect("revisions");
	assert_eq!(revisions.len(), 2);
	assert_eq!(revisions["global"], 4);
	assert_eq!(revisions["local"], 2);

	let mut streams = store.list_streams().await.expect("streams");
	streams.sort();
	assert_eq!(streams, vec![other_branch, global, local]);
}

#[tokio::test]
async fn stream_since_pages_through_the_log() {
	let (_dir, db) = database().await;
	let store = OperationStore::new(db);
	let key = key("doc-1");

	store
		.append(&operations(&key, None, 10))
		.await
		.expect("append");

	let indexes = store
		.stream_since(key.clone(), 3, 3)
		.map_ok(|op| op.index)
		.try_collect::<Vec<_>>()
		.await
		.expect("stream");

	assert_eq!(indexes, (3..10).collect::<Vec<_>>());

	let empty = store
		.stream_since(key, 10, 3)
		.try_collect::<Vec<_>>()
		.await
		.expect("stream");
	assert!(empty.is_empty());
}

#[tokio::test]
async fn snapshots_follow_the_head() {
	let (_dir, db) = database().await;
	let operations_store = OperationStore::new(db.clone());
	let snapshots = SnapshotStore::new(db);
	let key = key("doc-1");

	let first = operations(&key, None, 2);
	operations_store.append(&first).await.expect("append");

	let head = first.last().expect("head");
	let snapshot = snapshots
		.put(COUNTER, json!({ "count": 2 }), head)
		.await
		.expect("put");
	assert_eq!(snapshot.snapshot_version, 1);
	assert_eq!(snapshot.revision(), 2);

	let fresh = snapshots
		.get_fresh(&key, Some(head))
		.await
		.expect("get")
		.expect("fresh snapshot");
	assert_eq!(fresh.content, json!({ "count": 2 }));
	assert_eq!(fresh.last_operation_hash, head.op_id.as_str());

	// the log moved on without the snapshot
	let second = operations(&key, Some(head), 1);
	operations_store.append(&second).await.expect("append");
	assert!(snapshots
		.get_fresh(&key, second.last())
		.await
		.expect("get")
		.is_none());

	let snapshot = snapshots
		.put(COUNTER, json!({ "count": 3 }), &second[0])
		.await
		.expect("put");
	assert_eq!(snapshot.snapshot_version, 2);

	assert!(snapshots.invalidate(&key).await.expect("invalidate"));
	assert!(!snapshots.invalidate(&key).await.expect("invalidate"));
	assert!(snapshots.get(&key).await.expect("get").is_none());

	// writing again revives it
	let snapshot = snapshots
		.put(COUNTER, json!({ "count": 3 }), &second[0])
		.await
		.expect("put");
	assert_eq!(snapshot.snapshot_version, 3);
	assert!(!snapshot.is_deleted);
}
