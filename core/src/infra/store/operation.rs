use std::collections::HashMap;

use reactor_sync::{detect_conflicts, verify_chain, Action, OpId, Operation};
use reactor_utils::db::{u64_from_db, u64_to_db};

use chrono::Utc;
use futures::{stream, Stream, TryStreamExt};
use sea_orm::{
	ActiveValue::{NotSet, Set},
	ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select,
	TransactionTrait,
};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::infra::{
	db::{entities::operation, Database},
	stream::StreamKey,
};

use super::StorageError;

/// Append-only log of operations, the single source of truth of every document.
///
/// Revisions follow the head: a stream whose last operation sits at index `n` is at revision
/// `n + 1`, an empty stream at revision 0. Reading "since revision `r`" returns the operations with
/// `index >= r`.
#[derive(Debug, Clone)]
pub struct OperationStore {
	db: Database,
}

impl OperationStore {
	#[must_use]
	pub const fn new(db: Database) -> Self {
		Self { db }
	}

	#[must_use]
	pub const fn db(&self) -> &Database {
		&self.db
	}

	/// Appends `operations` in their own transaction.
	pub async fn append(&self, operations: &[Operation]) -> Result<(), StorageError> {
		let txn = self.db.conn().begin().await?;
		Self::append_in(&txn, operations).await?;
		txn.commit().await?;

		Ok(())
	}

	/// Appends `operations`, which must all belong to one stream, on top of its current head.
	///
	/// Fails without writing anything if the first operation doesn't link to the head, if the
	/// indexes don't strictly increase past it, or if two operations claim the same position.
	pub async fn append_in<C: ConnectionTrait>(
		conn: &C,
		operations: &[Operation],
	) -> Result<(), StorageError> {
		let Some(first) = operations.first() else {
			return Ok(());
		};

		let key = StreamKey::of(first);

		if let Some(stranger) = operations.iter().find(|op| !key.contains(op)) {
			return Err(StorageError::MixedStreams(StreamKey::of(stranger).to_string()));
		}

		if let Some(conflict) = detect_conflicts(operations).first() {
			return Err(StorageError::Conflict {
				key: key.to_string(),
				index: conflict.index,
			});
		}

		let head = Self::head_in(conn, &key).await?;

		let mut last_index = head.as_ref().map(|op| op.index);
		for op in operations {
			if last_index.is_some_and(|last| op.index <= last) {
				return Err(StorageError::RevisionMismatch {
					key: key.to_string(),
					head: head.as_ref().map(|op| op.index),
					index: op.index,
				});
			}
			last_index = Some(op.index);
		}

		verify_chain(operations, head.as_ref().map(|op| &op.op_id))?;

		let write_timestamp_utc_ms = Utc::now().timestamp_millis();
		let models = operations
			.iter()
			.map(|op| to_active_model(op, write_timestamp_utc_ms))
			.collect::<Result<Vec<_>, _>>()?;

		operation::Entity::insert_many(models)
			.exec(conn)
			.await
			.map_err(|e| StorageError::on_insert(e, &key, first.index))?;

		debug!(
			%key,
			count = operations.len(),
			first_index = first.index,
			"Operations appended",
		);

		Ok(())
	}

	pub async fn head(&self, key: &StreamKey) -> Result<Option<Operation>, StorageError> {
		Self::head_in(self.db.conn(), key).await
	}

	pub async fn head_in<C: ConnectionTrait>(
		conn: &C,
		key: &StreamKey,
	) -> Result<Option<Operation>, StorageError> {
		stream_query(key)
			.order_by_desc(operation::Column::Index)
			.one(conn)
			.await?
			.map(from_model)
			.transpose()
	}

	/// Revision of a stream, 0 when it has no operations.
	pub async fn revision(&self, key: &StreamKey) -> Result<u64, StorageError> {
		Ok(self.head(key).await?.map_or(0, |op| op.index + 1))
	}

	/// Operations with `index >= revision`, in index order, at most `limit` of them.
	pub async fn operations_since(
		&self,
		key: &StreamKey,
		revision: u64,
		limit: Option<usize>,
	) -> Result<Vec<Operation>, StorageError> {
		trace!(%key, revision, ?limit, "Reading operations");

		stream_query(key)
			.filter(operation::Column::Index.gte(u64_to_db(revision)))
			.order_by_asc(operation::Column::Index)
			.limit(limit.map(|limit| u64::try_from(limit).unwrap_or(u64::MAX)))
			.all(self.db.conn())
			.await?
			.into_iter()
			.map(from_model)
			.collect()
	}

	/// Operations with `revision <= index < until`, in index order.
	pub async fn operations_between(
		&self,
		key: &StreamKey,
		revision: u64,
		until: u64,
	) -> Result<Vec<Operation>, StorageError> {
		stream_query(key)
			.filter(operation::Column::Index.gte(u64_to_db(revision)))
			.filter(operation::Column::Index.lt(u64_to_db(until)))
			.order_by_asc(operation::Column::Index)
			.all(self.db.conn())
			.await?
			.into_iter()
			.map(from_model)
			.collect()
	}

	/// Every operation with `index >= revision`, read lazily in pages of `batch_size`.
	pub fn stream_since(
		&self,
		key: StreamKey,
		revision: u64,
		batch_size: usize,
	) -> impl Stream<Item = Result<Operation, StorageError>> + '_ {
		let batch_size = batch_size.max(1);

		stream::try_unfold(Some(revision), move |next| {
			let key = key.clone();
			async move {
				let Some(from) = next else {
					return Ok::<_, StorageError>(None);
				};

				let batch = self.operations_since(&key, from, Some(batch_size)).await?;
				if batch.is_empty() {
					return Ok(None);
				}

				let next = if batch.len() < batch_size {
					None
				} else {
					batch.last().map(|op| op.index + 1)
				};

				Ok(Some((stream::iter(batch.into_iter().map(Ok)), next)))
			}
		})
		.try_flatten()
	}

	/// Revision of every scope of a document on `branch`.
	pub async fn get_revisions(
		&self,
		document_id: &str,
		branch: &str,
	) -> Result<HashMap<String, u64>, StorageError> {
		let heads = operation::Entity::find()
			.select_only()
			.column(operation::Column::Scope)
			.column_as(operation::Column::Index.max(), "max_index")
			.filter(operation::Column::DocumentId.eq(document_id))
			.filter(operation::Column::Branch.eq(branch))
			.group_by(operation::Column::Scope)
			.into_tuple::<(String, i64)>()
			.all(self.db.conn())
			.await?;

		heads
			.into_iter()
			.map(|(scope, index)| Ok((scope, u64_from_db("index", index)? + 1)))
			.collect()
	}

	/// Every stream that has at least one operation.
	pub async fn list_streams(&self) -> Result<Vec<StreamKey>, StorageError> {
		Ok(operation::Entity::find()
			.select_only()
			.columns([
				operation::Column::DocumentId,
				operation::Column::Scope,
				operation::Column::Branch,
			])
			.distinct()
			.into_tuple::<(String, String, String)>()
			.all(self.db.conn())
			.await?
			.into_iter()
			.map(|(document_id, scope, branch)| StreamKey::new(document_id, scope, branch))
			.collect())
	}

	/// Operations with a timestamp at or after `timestamp_utc_ms`, in index order, at most `limit`
	/// of them.
	pub async fn operations_after_timestamp(
		&self,
		key: &StreamKey,
		timestamp_utc_ms: i64,
		limit: usize,
	) -> Result<Vec<Operation>, StorageError> {
		stream_query(key)
			.filter(operation::Column::TimestampUtcMs.gte(timestamp_utc_ms))
			.order_by_asc(operation::Column::Index)
			.limit(u64::try_from(limit).unwrap_or(u64::MAX))
			.all(self.db.conn())
			.await?
			.into_iter()
			.map(from_model)
			.collect()
	}

	/// Operations written by a job, in write order.
	pub async fn operations_of_job(&self, job_id: Uuid) -> Result<Vec<Operation>, StorageError> {
		Self::operations_of_job_in(self.db.conn(), job_id).await
	}

	pub async fn operations_of_job_in<C: ConnectionTrait>(
		conn: &C,
		job_id: Uuid,
	) -> Result<Vec<Operation>, StorageError> {
		operation::Entity::find()
			.filter(operation::Column::JobId.eq(job_id))
			.order_by_asc(operation::Column::Id)
			.all(conn)
			.await?
			.into_iter()
			.map(from_model)
			.collect()
	}
}

fn stream_query(key: &StreamKey) -> Select<operation::Entity> {
	operation::Entity::find()
		.filter(operation::Column::DocumentId.eq(key.document_id.as_str()))
		.filter(operation::Column::Scope.eq(key.scope.as_str()))
		.filter(operation::Column::Branch.eq(key.branch.as_str()))
}

fn to_active_model(
	op: &Operation,
	write_timestamp_utc_ms: i64,
) -> Result<operation::ActiveModel, StorageError> {
	Ok(operation::ActiveModel {
		id: NotSet,
		job_id: Set(op.job_id),
		op_id: Set(op.op_id.to_string()),
		prev_op_id: Set(op.prev_op_id.as_ref().map(ToString::to_string)),
		document_id: Set(op.document_id.clone()),
		document_type: Set(op.document_type.clone()),
		scope: Set(op.scope.clone()),
		branch: Set(op.branch.clone()),
		index: Set(u64_to_db(op.index)),
		skip: Set(u64_to_db(op.skip)),
		timestamp_utc_ms: Set(op.timestamp_utc_ms),
		action: Set(serde_json::to_value(&op.action)?),
		error: Set(op.error.clone()),
		hash: Set(op.hash.clone()),
		write_timestamp_utc_ms: Set(write_timestamp_utc_ms),
	})
}

fn from_model(model: operation::Model) -> Result<Operation, StorageError> {
	Ok(Operation {
		op_id: OpId::from(model.op_id),
		prev_op_id: model.prev_op_id.map(OpId::from),
		job_id: model.job_id,
		document_id: model.document_id,
		document_type: model.document_type,
		scope: model.scope,
		branch: model.branch,
		index: u64_from_db("index", model.index)?,
		skip: u64_from_db("skip", model.skip)?,
		timestamp_utc_ms: model.timestamp_utc_ms,
		action: serde_json::from_value::<Action>(model.action)?,
		error: model.error,
		hash: model.hash,
	})
}
