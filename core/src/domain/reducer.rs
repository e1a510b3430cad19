use std::{
	collections::HashMap,
	fmt,
	sync::{Arc, PoisonError, RwLock},
};

use reactor_sync::Action;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReducerError {
	/// The action is invalid for the current state, recorded on its operation
	#[error("action rejected: {0}")]
	Rejected(String),
	/// The reducer couldn't run right now, the job is retried
	#[error("reducer temporarily unavailable: {0}")]
	Transient(String),
}

impl ReducerError {
	#[must_use]
	pub const fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_))
	}
}

/// State transition function of one document type.
#[async_trait]
pub trait Reducer: Send + Sync + 'static {
	fn document_type(&self) -> &str;

	/// State of a scope before its first operation.
	fn initial_state(&self, scope: &str) -> Value;

	async fn reduce(&self, state: Value, action: &Action) -> Result<Value, ReducerError>;
}

/// Resolves document types to their reducers.
#[derive(Default)]
pub struct DocumentModelRegistry {
	reducers: RwLock<HashMap<String, Arc<dyn Reducer>>>,
}

impl fmt::Debug for DocumentModelRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DocumentModelRegistry")
			.field("document_types", &self.document_types())
			.finish()
	}
}

impl DocumentModelRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `reducer` for its document type, replacing any previous one.
	pub fn register(&self, reducer: impl Reducer) {
		let document_type = reducer.document_type().to_string();

		let previous = self
			.reducers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(document_type.clone(), Arc::new(reducer));

		if previous.is_some() {
			warn!(%document_type, "Replaced reducer of document type");
		} else {
			debug!(%document_type, "Registered document type");
		}
	}

	#[must_use]
	pub fn get(&self, document_type: &str) -> Option<Arc<dyn Reducer>> {
		self.reducers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(document_type)
			.map(Arc::clone)
	}

	#[must_use]
	pub fn document_types(&self) -> Vec<String> {
		let mut types = self
			.reducers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.keys()
			.cloned()
			.collect::<Vec<_>>();
		types.sort();
		types
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	struct Counter;

	#[async_trait]
	impl Reducer for Counter {
		fn document_type(&self) -> &str {
			"test/counter"
		}

		fn initial_state(&self, _scope: &str) -> Value {
			json!({ "count": 0 })
		}

		async fn reduce(&self, state: Value, action: &Action) -> Result<Value, ReducerError> {
			let count = state["count"].as_i64().unwrap_or_default();
			match action.action_type.as_str() {
				"INCREMENT" => Ok(json!({ "count": count + 1 })),
				other => Err(ReducerError::Rejected(format!("unknown action {other}"))),
			}
		}
	}

	#[tokio::test]
	async fn resolves_registered_reducers() {
		let registry = DocumentModelRegistry::new();
		registry.register(Counter);

		assert_eq!(registry.document_types(), vec!["test/counter".to_string()]);
		assert!(registry.get("test/unknown").is_none());

		let reducer = registry.get("test/counter").expect("registered");
		let state = reducer
			.reduce(
				reducer.initial_state("global"),
				&Action::new("INCREMENT", "global", json!({})),
			)
			.await
			.expect("reduced");
		assert_eq!(state, json!({ "count": 1 }));

		let err = reducer
			.reduce(state, &Action::new("DECREMENT", "global", json!({})))
			.await
			.expect_err("rejected");
		assert!(!err.is_transient());
	}
}
