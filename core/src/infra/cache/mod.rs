//! Write cache of recently produced document states
//!
//! Every stream keeps its last few states in a ring buffer, streams themselves are evicted in LRU
//! order. A miss rebuilds the state from the nearest keyframe and the operations after it, and
//! every `keyframe_interval` revisions a keyframe is persisted so rebuilds stay cheap.

use std::{
	collections::{HashMap, VecDeque},
	fmt,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use reactor_sync::{garbage_collect, sort_operations};
use reactor_utils::LruTracker;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
	config::CacheConfig,
	domain::{DocumentModelRegistry, Reducer, ReducerError},
};

use super::{
	store::{KeyframeStore, OperationStore, StorageError},
	stream::StreamKey,
};

#[derive(Debug, Error)]
pub enum CacheError {
	#[error("no reducer registered for document type '{0}'")]
	UnknownDocumentType(String),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("failed to replay operations: {0}")]
	Replay(#[from] ReducerError),
}

impl CacheError {
	#[must_use]
	pub const fn is_transient(&self) -> bool {
		match self {
			Self::UnknownDocumentType(_) => false,
			Self::Storage(e) => e.is_transient(),
			Self::Replay(e) => e.is_transient(),
		}
	}
}

/// State of a stream at `revision`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedState {
	pub revision: u64,
	pub state: Value,
}

#[derive(Debug)]
struct RingBuffer {
	entries: VecDeque<CachedState>,
	capacity: usize,
}

impl RingBuffer {
	fn new(capacity: usize) -> Self {
		Self {
			entries: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	/// Keeps entries sorted by revision, dropping the oldest one when full.
	fn push(&mut self, entry: CachedState) {
		match self
			.entries
			.binary_search_by_key(&entry.revision, |cached| cached.revision)
		{
			Ok(position) => self.entries[position] = entry,
			Err(position) => {
				self.entries.insert(position, entry);
				if self.entries.len() > self.capacity {
					self.entries.pop_front();
				}
			}
		}
	}

	fn get(&self, revision: u64) -> Option<&CachedState> {
		self.entries
			.iter()
			.rev()
			.find(|cached| cached.revision == revision)
	}
}

#[derive(Debug, Default)]
struct Inner {
	lru: LruTracker<StreamKey>,
	streams: HashMap<StreamKey, RingBuffer>,
}

pub struct WriteCache {
	config: CacheConfig,
	operations: OperationStore,
	keyframes: Arc<dyn KeyframeStore>,
	registry: Arc<DocumentModelRegistry>,
	inner: Mutex<Inner>,
}

impl fmt::Debug for WriteCache {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WriteCache")
			.field("config", &self.config)
			.field("streams", &self.len())
			.finish_non_exhaustive()
	}
}

impl WriteCache {
	pub fn new(
		config: CacheConfig,
		operations: OperationStore,
		keyframes: Arc<dyn KeyframeStore>,
		registry: Arc<DocumentModelRegistry>,
	) -> Self {
		Self {
			config,
			operations,
			keyframes,
			registry,
			inner: Mutex::default(),
		}
	}

	fn inner(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn reducer(&self, document_type: &str) -> Result<Arc<dyn Reducer>, CacheError> {
		self.registry
			.get(document_type)
			.ok_or_else(|| CacheError::UnknownDocumentType(document_type.to_string()))
	}

	/// State of `key` at `revision`, or at its current revision when `None`.
	pub async fn get_state(
		&self,
		key: &StreamKey,
		document_type: &str,
		revision: Option<u64>,
		signal: Option<&CancellationToken>,
	) -> Result<CachedState, CacheError> {
		let revision = match revision {
			Some(revision) => revision,
			None => self.operations.revision(key).await?,
		};

		if let Some(cached) = self.lookup(key, revision) {
			trace!(%key, revision, "Write cache hit");
			return Ok(cached);
		}

		let reducer = self.reducer(document_type)?;
		let state = self.rebuild(key, reducer.as_ref(), revision, signal).await?;

		let cached = CachedState { revision, state };
		self.remember(key, cached.clone());

		Ok(cached)
	}

	/// Caches the state produced by a write.
	pub fn put_state(&self, key: &StreamKey, revision: u64, state: Value) {
		self.remember(key, CachedState { revision, state });
	}

	/// Persists the state at `revision` as a keyframe when it falls on an interval boundary.
	///
	/// Failures are only logged, the log still holds everything needed to rebuild.
	pub async fn persist_keyframe(&self, key: &StreamKey, document_type: &str, revision: u64) {
		if revision == 0 || revision % self.config.keyframe_interval.max(1) != 0 {
			return;
		}

		let res = match self.get_state(key, document_type, Some(revision), None).await {
			Ok(cached) => {
				self.keyframes
					.put_keyframe(key, document_type, revision, &cached.state, None)
					.await
			}
			Err(CacheError::Storage(e)) => Err(e),
			Err(e) => {
				warn!(%key, revision, ?e, "Failed to compute keyframe state");
				return;
			}
		};

		if let Err(e) = res {
			warn!(%key, revision, ?e, "Failed to persist keyframe");
		}
	}

	pub fn invalidate(&self, key: &StreamKey) -> bool {
		let mut inner = self.inner();
		inner.lru.remove(key);
		inner.streams.remove(key).is_some()
	}

	pub fn clear(&self) {
		let mut inner = self.inner();
		inner.lru.clear();
		inner.streams.clear();
	}

	/// Number of streams currently cached.
	#[must_use]
	pub fn len(&self) -> usize {
		self.inner().streams.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lookup(&self, key: &StreamKey, revision: u64) -> Option<CachedState> {
		let mut inner = self.inner();
		let cached = inner.streams.get(key)?.get(revision).cloned()?;
		inner.lru.touch(key);
		Some(cached)
	}

	fn remember(&self, key: &StreamKey, cached: CachedState) {
		let mut inner = self.inner();
		let capacity = self.config.ring_buffer_size.max(1);

		inner
			.streams
			.entry(key.clone())
			.or_insert_with(|| RingBuffer::new(capacity))
			.push(cached);
		inner.lru.touch(key);

		while inner.streams.len() > self.config.max_documents.max(1) {
			let Some(evicted) = inner.lru.evict() else {
				break;
			};
			inner.streams.remove(&evicted);
			debug!(key = %evicted, "Evicted stream from write cache");
		}
	}

	async fn rebuild(
		&self,
		key: &StreamKey,
		reducer: &dyn Reducer,
		revision: u64,
		signal: Option<&CancellationToken>,
	) -> Result<Value, CacheError> {
		let keyframe = self
			.keyframes
			.find_nearest_keyframe(key, revision, signal)
			.await?;

		let (from, mut state) = keyframe.map_or_else(
			|| (0, reducer.initial_state(&key.scope)),
			|keyframe| (keyframe.revision, keyframe.state),
		);

		let mut operations = self
			.operations
			.operations_between(key, from, revision)
			.await?;

		if from > 0 && operations.iter().any(|op| op.skip > 0) {
			// an undo may hide operations from before the keyframe
			state = reducer.initial_state(&key.scope);
			operations = self.operations.operations_between(key, 0, revision).await?;
		}

		debug!(
			%key,
			revision,
			keyframe = from,
			replayed = operations.len(),
			"Rebuilding state",
		);

		for op in garbage_collect(sort_operations(operations)) {
			if signal.is_some_and(CancellationToken::is_cancelled) {
				return Err(StorageError::Aborted.into());
			}

			if op.is_failed() {
				continue;
			}

			state = reducer.reduce(state, &op.action).await?;
		}

		Ok(state)
	}
}
