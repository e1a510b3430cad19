use reactor_sync::Operation;
use reactor_utils::db::{u64_from_db, u64_to_db};

use chrono::{DateTime, Utc};
use sea_orm::{
	ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel,
	QueryFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::infra::{
	db::{entities::document_snapshot, Database},
	stream::StreamKey,
};

use super::StorageError;

/// Materialized state of a stream after its last applied operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
	pub key: StreamKey,
	pub document_type: String,
	pub content: Value,
	pub last_operation_index: u64,
	pub last_operation_hash: String,
	pub snapshot_version: u64,
	pub identifiers: Option<Value>,
	pub metadata: Option<Value>,
	pub is_deleted: bool,
	pub deleted_at: Option<DateTime<Utc>>,
	pub updated_at: DateTime<Utc>,
}

impl DocumentSnapshot {
	/// A snapshot is stale as soon as it doesn't describe the head of the log.
	#[must_use]
	pub fn is_stale(&self, head: Option<&Operation>) -> bool {
		head.map_or(true, |head| {
			self.last_operation_index != head.index
				|| self.last_operation_hash != head.op_id.as_str()
		})
	}

	/// Revision the content corresponds to.
	#[must_use]
	pub const fn revision(&self) -> u64 {
		self.last_operation_index + 1
	}
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
	db: Database,
}

impl SnapshotStore {
	#[must_use]
	pub const fn new(db: Database) -> Self {
		Self { db }
	}

	/// Current snapshot of `key`, invalidated snapshots are never handed out.
	pub async fn get(&self, key: &StreamKey) -> Result<Option<DocumentSnapshot>, StorageError> {
		find(self.db.conn(), key)
			.await?
			.filter(|model| !model.is_deleted)
			.map(from_model)
			.transpose()
	}

	/// Snapshot of `key` only if it still matches `head`.
	pub async fn get_fresh(
		&self,
		key: &StreamKey,
		head: Option<&Operation>,
	) -> Result<Option<DocumentSnapshot>, StorageError> {
		let snapshot = self.get(key).await?;

		if let Some(snapshot) = snapshot.as_ref().filter(|snapshot| snapshot.is_stale(head)) {
			warn!(
				%key,
				snapshot_index = snapshot.last_operation_index,
				head_index = ?head.map(|op| op.index),
				"Stale snapshot found",
			);
			return Ok(None);
		}

		Ok(snapshot)
	}

	pub async fn put(
		&self,
		document_type: &str,
		content: Value,
		head: &Operation,
	) -> Result<DocumentSnapshot, StorageError> {
		Self::put_in(self.db.conn(), document_type, content, head).await
	}

	/// Stores `content` as the state after `head`, bumping the snapshot version.
	///
	/// Meant to run in the same transaction as the append of `head`.
	pub async fn put_in<C: ConnectionTrait>(
		conn: &C,
		document_type: &str,
		content: Value,
		head: &Operation,
	) -> Result<DocumentSnapshot, StorageError> {
		let key = StreamKey::of(head);
		let now = Utc::now();

		let model = if let Some(existing) = find(conn, &key).await? {
			let version = u64_from_db("snapshot_version", existing.snapshot_version)? + 1;

			let mut active = existing.into_active_model();
			active.content = Set(content);
			active.document_type = Set(document_type.to_string());
			active.last_operation_index = Set(u64_to_db(head.index));
			active.last_operation_hash = Set(head.op_id.to_string());
			active.snapshot_version = Set(u64_to_db(version));
			active.is_deleted = Set(false);
			active.deleted_at = Set(None);
			active.updated_at = Set(now);

			active.update(conn).await?
		} else {
			document_snapshot::ActiveModel {
				document_id: Set(key.document_id.clone()),
				scope: Set(key.scope.clone()),
				branch: Set(key.branch.clone()),
				content: Set(content),
				document_type: Set(document_type.to_string()),
				last_operation_index: Set(u64_to_db(head.index)),
				last_operation_hash: Set(head.op_id.to_string()),
				snapshot_version: Set(1),
				identifiers: Set(None),
				metadata: Set(None),
				is_deleted: Set(false),
				deleted_at: Set(None),
				updated_at: Set(now),
				..Default::default()
			}
			.insert(conn)
			.await?
		};

		debug!(
			%key,
			index = head.index,
			version = model.snapshot_version,
			"Snapshot updated",
		);

		from_model(model)
	}

	/// Marks the snapshot of `key` as stale, returns whether there was one to invalidate.
	pub async fn invalidate(&self, key: &StreamKey) -> Result<bool, StorageError> {
		let Some(existing) = find(self.db.conn(), key).await? else {
			return Ok(false);
		};

		if existing.is_deleted {
			return Ok(false);
		}

		let mut active = existing.into_active_model();
		active.is_deleted = Set(true);
		active.deleted_at = Set(Some(Utc::now()));
		active.update(self.db.conn()).await?;

		debug!(%key, "Snapshot invalidated");

		Ok(true)
	}

	pub async fn set_metadata(
		&self,
		key: &StreamKey,
		identifiers: Option<Value>,
		metadata: Option<Value>,
	) -> Result<bool, StorageError> {
		let Some(existing) = find(self.db.conn(), key).await? else {
			return Ok(false);
		};

		let mut active = existing.into_active_model();
		active.identifiers = Set(identifiers);
		active.metadata = Set(metadata);
		active.update(self.db.conn()).await?;

		Ok(true)
	}
}

async fn find<C: ConnectionTrait>(
	conn: &C,
	key: &StreamKey,
) -> Result<Option<document_snapshot::Model>, StorageError> {
	Ok(document_snapshot::Entity::find()
		.filter(document_snapshot::Column::DocumentId.eq(key.document_id.as_str()))
		.filter(document_snapshot::Column::Scope.eq(key.scope.as_str()))
		.filter(document_snapshot::Column::Branch.eq(key.branch.as_str()))
		.one(conn)
		.await?)
}

fn from_model(model: document_snapshot::Model) -> Result<DocumentSnapshot, StorageError> {
	Ok(DocumentSnapshot {
		key: StreamKey::new(model.document_id, model.scope, model.branch),
		document_type: model.document_type,
		content: model.content,
		last_operation_index: u64_from_db("last_operation_index", model.last_operation_index)?,
		last_operation_hash: model.last_operation_hash,
		snapshot_version: u64_from_db("snapshot_version", model.snapshot_version)?,
		identifiers: model.identifiers,
		metadata: model.metadata,
		is_deleted: model.is_deleted,
		deleted_at: model.deleted_at,
		updated_at: model.updated_at,
	})
}
