use std::sync::atomic::{AtomicU64, Ordering};

use reactor_utils::db::{u64_from_db, u64_to_db};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
	sea_query::OnConflict, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
	QueryTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::infra::{
	db::{entities::keyframe, Database},
	stream::StreamKey,
};

use super::{check_aborted, StorageError};

/// Full state of a stream at `revision`, that is after every operation with `index < revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
	pub revision: u64,
	pub document_type: String,
	pub state: Value,
}

#[async_trait]
pub trait KeyframeStore: Send + Sync + 'static {
	/// Stores `state` as the keyframe of `key` at `revision`, replacing any previous one.
	async fn put_keyframe(
		&self,
		key: &StreamKey,
		document_type: &str,
		revision: u64,
		state: &Value,
		signal: Option<&CancellationToken>,
	) -> Result<(), StorageError>;

	/// Keyframe with the largest revision `<= target_revision`.
	async fn find_nearest_keyframe(
		&self,
		key: &StreamKey,
		target_revision: u64,
		signal: Option<&CancellationToken>,
	) -> Result<Option<Keyframe>, StorageError>;

	/// Deletes the keyframes of a document, narrowed to one scope and/or branch when given.
	async fn delete_keyframes(
		&self,
		document_id: &str,
		scope: Option<&str>,
		branch: Option<&str>,
		signal: Option<&CancellationToken>,
	) -> Result<u64, StorageError>;
}

#[derive(Debug, Clone)]
pub struct DbKeyframeStore {
	db: Database,
}

impl DbKeyframeStore {
	#[must_use]
	pub const fn new(db: Database) -> Self {
		Self { db }
	}
}

#[async_trait]
impl KeyframeStore for DbKeyframeStore {
	async fn put_keyframe(
		&self,
		key: &StreamKey,
		document_type: &str,
		revision: u64,
		state: &Value,
		signal: Option<&CancellationToken>,
	) -> Result<(), StorageError> {
		check_aborted(signal)?;

		keyframe::Entity::insert(keyframe::ActiveModel {
			document_id: Set(key.document_id.clone()),
			document_type: Set(document_type.to_string()),
			scope: Set(key.scope.clone()),
			branch: Set(key.branch.clone()),
			revision: Set(u64_to_db(revision)),
			document: Set(state.clone()),
			created_at: Set(Utc::now()),
			..Default::default()
		})
		.on_conflict(
			OnConflict::columns([
				keyframe::Column::DocumentId,
				keyframe::Column::Scope,
				keyframe::Column::Branch,
				keyframe::Column::Revision,
			])
			.update_columns([
				keyframe::Column::DocumentType,
				keyframe::Column::Document,
				keyframe::Column::CreatedAt,
			])
			.to_owned(),
		)
		.exec(self.db.conn())
		.await?;

		trace!(%key, revision, "Keyframe stored");

		Ok(())
	}

	async fn find_nearest_keyframe(
		&self,
		key: &StreamKey,
		target_revision: u64,
		signal: Option<&CancellationToken>,
	) -> Result<Option<Keyframe>, StorageError> {
		check_aborted(signal)?;

		keyframe::Entity::find()
			.filter(keyframe::Column::DocumentId.eq(key.document_id.as_str()))
			.filter(keyframe::Column::Scope.eq(key.scope.as_str()))
			.filter(keyframe::Column::Branch.eq(key.branch.as_str()))
			.filter(keyframe::Column::Revision.lte(u64_to_db(target_revision)))
			.order_by_desc(keyframe::Column::Revision)
			.one(self.db.conn())
			.await?
			.map(|model| {
				Ok(Keyframe {
					revision: u64_from_db("revision", model.revision)?,
					document_type: model.document_type,
					state: model.document,
				})
			})
			.transpose()
	}

	async fn delete_keyframes(
		&self,
		document_id: &str,
		scope: Option<&str>,
		branch: Option<&str>,
		signal: Option<&CancellationToken>,
	) -> Result<u64, StorageError> {
		check_aborted(signal)?;

		let deleted = keyframe::Entity::delete_many()
			.filter(keyframe::Column::DocumentId.eq(document_id))
			.apply_if(scope, |query, scope| {
				query.filter(keyframe::Column::Scope.eq(scope))
			})
			.apply_if(branch, |query, branch| {
				query.filter(keyframe::Column::Branch.eq(branch))
			})
			.exec(self.db.conn())
			.await?
			.rows_affected;

		trace!(%document_id, ?scope, ?branch, deleted, "Keyframes deleted");

		Ok(deleted)
	}
}

/// Logs every `every`th keyframe write of the wrapped store.
///
/// Reads and deletes go straight through, writes keep the result of the inner store.
#[derive(Debug)]
pub struct SampledKeyframeStore<S> {
	inner: S,
	every: u64,
	writes: AtomicU64,
}

impl<S: KeyframeStore> SampledKeyframeStore<S> {
	/// An `every` of 0 is treated as 1.
	pub fn new(inner: S, every: u64) -> Self {
		Self {
			inner,
			every: every.max(1),
			writes: AtomicU64::new(0),
		}
	}

	pub fn into_inner(self) -> S {
		self.inner
	}
}

#[async_trait]
impl<S: KeyframeStore> KeyframeStore for SampledKeyframeStore<S> {
	async fn put_keyframe(
		&self,
		key: &StreamKey,
		document_type: &str,
		revision: u64,
		state: &Value,
		signal: Option<&CancellationToken>,
	) -> Result<(), StorageError> {
		let res = self
			.inner
			.put_keyframe(key, document_type, revision, state, signal)
			.await;

		let write = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
		if write % self.every == 0 {
			info!(
				target: "reactor::keyframe_sample",
				%key,
				%document_type,
				revision,
				write,
				ok = res.is_ok(),
				"Keyframe write sampled",
			);
		}

		res
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
