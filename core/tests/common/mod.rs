#![allow(dead_code)]

use std::sync::Arc;

use reactor_core::{
	config::ReactorConfig,
	domain::{DocumentModelRegistry, Reducer, ReducerError},
	infra::{db::Database, stream::StreamKey},
	sync::{state_hash, Action, Operation},
	Reactor,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const COUNTER: &str = "test/counter";

/// `{ "count": n }`, `INCREMENT` adds `input.by` (1 by default), `REJECT` is always refused and
/// `FLAKY` never gets through.
pub struct Counter;

#[async_trait]
impl Reducer for Counter {
	fn document_type(&self) -> &str {
		COUNTER
	}

	fn initial_state(&self, _scope: &str) -> Value {
		json!({ "count": 0 })
	}

	async fn reduce(&self, state: Value, action: &Action) -> Result<Value, ReducerError> {
		match action.action_type.as_str() {
			"INCREMENT" => {
				let count = state["count"].as_i64().unwrap_or_default();
				let by = action.input["by"].as_i64().unwrap_or(1);
				Ok(json!({ "count": count + by }))
			}
			"REJECT" => Err(ReducerError::Rejected("nope".to_string())),
			"FLAKY" => Err(ReducerError::Transient("try again".to_string())),
			other => Err(ReducerError::Rejected(format!("unknown action {other}"))),
		}
	}
}

pub fn registry() -> Arc<DocumentModelRegistry> {
	let registry = DocumentModelRegistry::new();
	registry.register(Counter);
	Arc::new(registry)
}

pub async fn database() -> (TempDir, Database) {
	let dir = tempfile::tempdir().expect("temp dir");
	let db = Database::create(&dir.path().join("reactor.db"))
		.await
		.expect("database");

	(dir, db)
}

/// Fast retries so failing jobs settle quickly.
pub fn config() -> ReactorConfig {
	let mut config = ReactorConfig::default();
	config.executor.max_concurrency = 2;
	config.executor.retry_base_delay_ms = 5;
	config.executor.retry_max_delay_ms = 20;
	config.executor.max_retries = 2;
	config.executor.shutdown_grace_ms = 1_000;
	config
}

pub async fn reactor(config: ReactorConfig) -> (TempDir, Arc<Reactor>) {
	let (dir, db) = database().await;
	let reactor = Arc::new(Reactor::with_database(config, db, registry()));
	reactor.start().await;

	(dir, reactor)
}

pub fn key(document_id: &str) -> StreamKey {
	StreamKey::new(document_id, "global", "main")
}

pub fn increment(by: i64) -> Action {
	Action::new("INCREMENT", "global", json!({ "by": by }))
}

/// `count` increments chained on top of `head`, as the executor would have written them.
pub fn operations(key: &StreamKey, head: Option<&Operation>, count: u64) -> Vec<Operation> {
	let mut prev = head.cloned();
	let mut total = 0;

	(0..count)
		.map(|offset| {
			total += 1;

			let mut op = Operation {
				op_id: String::new().into(),
				prev_op_id: prev.as_ref().map(|op| op.op_id.clone()),
				job_id: None,
				document_id: key.document_id.clone(),
				document_type: COUNTER.to_string(),
				scope: key.scope.clone(),
				branch: key.branch.clone(),
				index: prev.as_ref().map_or(0, |op| op.index + 1),
				skip: 0,
				timestamp_utc_ms: 1_700_000_000_000 + i64::try_from(offset).unwrap_or_default(),
				action: increment(1),
				error: None,
				hash: state_hash(&json!({ "count": total })),
			};
			op.op_id = op.expected_op_id();

			prev = Some(op.clone());
			op
		})
		.collect()
}
