mod common;

use std::sync::Arc;

use common::{database, key, operations, registry, COUNTER};
use reactor_core::{
	config::CacheConfig,
	infra::{
		cache::WriteCache,
		db::Database,
		store::{DbKeyframeStore, KeyframeStore, OperationStore},
	},
};

use pretty_assertions::assert_eq;
use serde_json::json;
use tracing_test::traced_test;

fn cache(db: &Database, config: CacheConfig) -> (OperationStore, WriteCache) {
	let operations = OperationStore::new(db.clone());
	let keyframes: Arc<dyn KeyframeStore> = Arc::new(DbKeyframeStore::new(db.clone()));

	(
		operations.clone(),
		WriteCache::new(config, operations, keyframes, registry()),
	)
}

#[tokio::test]
#[traced_test]
async fn evicted_streams_rebuild_from_their_keyframe() {
	let (_dir, db) = database().await;
	let (store, cache) = cache(
		&db,
		CacheConfig {
			max_documents: 1,
			keyframe_interval: 4,
			..Default::default()
		},
	);
	let (doc_1, doc_2) = (key("doc-1"), key("doc-2"));

	store
		.append(&operations(&doc_1, None, 4))
		.await
		.expect("append");
	cache.put_state(&doc_1, 4, json!({ "count": 4 }));
	cache.persist_keyframe(&doc_1, COUNTER, 4).await;

	let head = store.head(&doc_1).await.expect("head");
	store
		.append(&operations(&doc_1, head.as_ref(), 1))
		.await
		.expect("append");
	cache.put_state(&doc_1, 5, json!({ "count": 5 }));

	store
		.append(&operations(&doc_2, None, 2))
		.await
		.expect("append");
	cache.put_state(&doc_2, 2, json!({ "count": 2 }));

	// doc-1 was the least recently used stream
	assert_eq!(cache.len(), 1);
	assert!(!logs_contain("Rebuilding state"));

	let state = cache
		.get_state(&doc_1, COUNTER, None, None)
		.await
		.expect("state");
	assert_eq!((state.revision, state.state), (5, json!({ "count": 5 })));
	assert!(logs_contain("keyframe=4 replayed=1"));

	// and doc-2 went out in turn
	assert_eq!(cache.len(), 1);
	let state = cache
		.get_state(&doc_2, COUNTER, Some(1), None)
		.await
		.expect("state");
	assert_eq!(state.state, json!({ "count": 1 }));
}

#[tokio::test]
async fn undo_past_a_keyframe_replays_the_whole_log() {
	let (_dir, db) = database().await;
	let (store, cache) = cache(
		&db,
		CacheConfig {
			keyframe_interval: 4,
			..Default::default()
		},
	);
	let key = key("doc-1");

	let history = operations(&key, None, 4);
	store.append(&history).await.expect("append");
	cache.persist_keyframe(&key, COUNTER, 4).await;

	// undoes the operations at index 2 and 3
	let mut undo = operations(&key, history.last(), 1);
	undo[0].skip = 2;
	undo[0].op_id = undo[0].expected_op_id();
	store.append(&undo).await.expect("append");

	let state = cache
		.get_state(&key, COUNTER, None, None)
		.await
		.expect("state");
	assert_eq!((state.revision, state.state), (5, json!({ "count": 3 })));
}
