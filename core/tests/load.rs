mod common;

use common::{config, increment, key, reactor, COUNTER};
use reactor_core::{
	infra::{
		job::{JobAwaiter, JobError, JobInfo, JobStatus},
		stream::StreamKey,
	},
	sync::{garbage_collect, sort_operations, verify_chain, Action, Operation},
	Error, Reactor,
};

use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

fn at(mut action: Action, timestamp_utc_ms: i64) -> Action {
	action.timestamp_utc_ms = timestamp_utc_ms;
	action
}

/// An operation written by another replica, its position and link only mean something there.
fn remote(key: &StreamKey, index: u64, action: Action) -> Operation {
	let mut op = Operation {
		op_id: String::new().into(),
		prev_op_id: None,
		job_id: None,
		document_id: key.document_id.clone(),
		document_type: COUNTER.to_string(),
		scope: key.scope.clone(),
		branch: key.branch.clone(),
		index,
		skip: 0,
		timestamp_utc_ms: action.timestamp_utc_ms,
		action,
		error: None,
		hash: String::new(),
	};
	op.op_id = op.expected_op_id();
	op
}

async fn settle(reactor: &Reactor, job: JobInfo) -> JobInfo {
	reactor
		.tracker()
		.wait_for_job(job.id, None)
		.await
		.expect("wait")
}

/// Writes increments of 1, 10 and 100 at t=1000, 2000 and 3000.
async fn local_history(reactor: &Reactor) -> Vec<Operation> {
	let job = reactor
		.execute(
			COUNTER,
			"doc-1",
			"main",
			vec![
				at(increment(1), 1_000),
				at(increment(10), 2_000),
				at(increment(100), 3_000),
			],
		)
		.await
		.expect("execute");

	let info = settle(reactor, job).await;
	assert_eq!(info.status, JobStatus::Completed);
	info.operations
}

#[tokio::test]
async fn divergent_operations_are_reshuffled_by_timestamp() {
	let (_dir, reactor) = reactor(config()).await;
	let key = key("doc-1");
	let local = local_history(&reactor).await;

	let incoming = vec![
		remote(&key, 1, at(increment(1_000), 1_500)),
		remote(&key, 2, at(increment(10_000), 2_500)),
	];

	let job = reactor.load(incoming.clone()).await.expect("load");
	let info = settle(&reactor, job).await;
	assert_eq!(info.status, JobStatus::Completed);

	let positions = info
		.operations
		.iter()
		.map(|op| (op.index, op.skip))
		.collect::<Vec<_>>();
	assert_eq!(positions, vec![(3, 2), (4, 0), (5, 0), (6, 0)]);

	let action_ids = info
		.operations
		.iter()
		.map(|op| op.action.id)
		.collect::<Vec<_>>();
	assert_eq!(
		action_ids,
		vec![
			incoming[0].action.id,
			local[1].action.id,
			incoming[1].action.id,
			local[2].action.id,
		]
	);

	let stored = reactor
		.operations()
		.operations_since(&key, 0, None)
		.await
		.expect("read");
	assert_eq!(stored.len(), 7);
	assert!(verify_chain(&stored, None).is_ok());

	let visible = garbage_collect(sort_operations(stored))
		.into_iter()
		.map(|op| op.action.id)
		.collect::<Vec<Uuid>>();
	assert_eq!(
		visible,
		vec![
			local[0].action.id,
			incoming[0].action.id,
			local[1].action.id,
			incoming[1].action.id,
			local[2].action.id,
		]
	);

	let state = reactor
		.state_at(&key, COUNTER, None)
		.await
		.expect("state");
	assert_eq!((state.revision, state.state), (7, json!({ "count": 11_111 })));

	// rebuilt from the log, the reshuffled tail hides the positions it replaced
	let state = reactor
		.state_at(&key, COUNTER, Some(5))
		.await
		.expect("state");
	assert_eq!(state.state, json!({ "count": 1_011 }));

	let snapshot = reactor
		.snapshot(&key)
		.await
		.expect("snapshot")
		.expect("snapshot");
	assert_eq!(snapshot.revision(), 7);
	assert_eq!(snapshot.content, json!({ "count": 11_111 }));

	// delivering the same operations again changes nothing
	let job = reactor.load(incoming).await.expect("load");
	let info = settle(&reactor, job).await;
	assert_eq!(info.status, JobStatus::Completed);
	assert!(info.operations.is_empty());
	assert_eq!(
		reactor.operations().revision(&key).await.expect("revision"),
		7
	);
}

#[tokio::test]
async fn operations_after_the_local_history_are_appended() {
	let (_dir, reactor) = reactor(config()).await;
	let key = key("doc-1");
	local_history(&reactor).await;

	let incoming = vec![
		remote(&key, 4, at(increment(2_000), 5_000)),
		remote(&key, 3, at(increment(1_000), 4_000)),
	];

	let job = reactor.load(incoming.clone()).await.expect("load");
	let info = settle(&reactor, job).await;
	assert_eq!(info.status, JobStatus::Completed);

	assert_eq!(
		info.operations
			.iter()
			.map(|op| (op.index, op.skip, op.action.id))
			.collect::<Vec<_>>(),
		vec![
			(3, 0, incoming[1].action.id),
			(4, 0, incoming[0].action.id),
		]
	);

	let state = reactor
		.state_at(&key, COUNTER, None)
		.await
		.expect("state");
	assert_eq!(state.state, json!({ "count": 3_111 }));
}

#[tokio::test]
async fn excessive_reshuffles_are_refused() {
	let mut config = config();
	config.executor.max_skip_threshold = 1;
	let (_dir, reactor) = reactor(config).await;
	let key = key("doc-1");
	local_history(&reactor).await;

	let job = reactor
		.load(vec![remote(&key, 0, at(increment(5), 500))])
		.await
		.expect("load");
	let info = settle(&reactor, job).await;

	assert_eq!(info.status, JobStatus::Failed);
	assert_eq!(info.attempts, 1);
	assert!(info.error.expect("error").contains("excessive reshuffle"));
	assert_eq!(
		reactor.operations().revision(&key).await.expect("revision"),
		3
	);
}

#[tokio::test]
async fn invalid_loads_are_refused() {
	let (_dir, reactor) = reactor(config()).await;

	assert!(matches!(
		reactor.load(Vec::new()).await,
		Err(Error::NoOperations)
	));

	assert!(matches!(
		reactor
			.load(vec![
				remote(&key("doc-1"), 0, increment(1)),
				remote(&key("doc-2"), 0, increment(1)),
			])
			.await,
		Err(Error::Job(JobError::ForeignOperation { .. }))
	));
}
