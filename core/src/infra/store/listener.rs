use std::collections::HashMap;

use reactor_utils::db::{u64_from_db, u64_to_db};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel,
	PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::infra::{
	db::{
		entities::{listener, listener_cursor},
		Database,
	},
	stream::StreamKey,
};

use super::{check_aborted, ListenerMode, StorageError};

/// Selects the streams a listener replicates, an empty list matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerFilter {
	#[serde(default)]
	pub document_type: Vec<String>,
	#[serde(default)]
	pub document_id: Vec<String>,
	#[serde(default)]
	pub scope: Vec<String>,
	#[serde(default)]
	pub branch: Vec<String>,
}

fn allows(list: &[String], value: &str) -> bool {
	list.is_empty() || list.iter().any(|allowed| allowed == "*" || allowed == value)
}

impl ListenerFilter {
	/// Whether the filter could match `key`, not knowing its document type.
	#[must_use]
	pub fn matches_stream(&self, key: &StreamKey) -> bool {
		allows(&self.document_id, &key.document_id)
			&& allows(&self.scope, &key.scope)
			&& allows(&self.branch, &key.branch)
	}

	#[must_use]
	pub fn matches(&self, key: &StreamKey, document_type: &str) -> bool {
		allows(&self.document_type, document_type) && self.matches_stream(key)
	}
}

/// How to reach a listener, opaque to the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
	pub transmitter: String,
	pub name: Option<String>,
	pub data: Option<String>,
}

/// Cursor of a listener for one synchronization unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRevision {
	pub key: StreamKey,
	pub revision: u64,
}

impl ListenerRevision {
	#[must_use]
	pub const fn new(key: StreamKey, revision: u64) -> Self {
		Self { key, revision }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerState {
	pub parent_id: String,
	pub listener_id: String,
	pub label: Option<String>,
	pub mode: ListenerMode,
	/// Whether writes to the parent should wait for this listener
	pub block: bool,
	pub system: bool,
	pub filter: ListenerFilter,
	pub call_info: Option<CallInfo>,
	pub cursors: Vec<ListenerRevision>,
}

impl ListenerState {
	pub fn new(
		parent_id: impl Into<String>,
		listener_id: impl Into<String>,
		mode: ListenerMode,
	) -> Self {
		Self {
			parent_id: parent_id.into(),
			listener_id: listener_id.into(),
			label: None,
			mode,
			block: false,
			system: false,
			filter: ListenerFilter::default(),
			call_info: None,
			cursors: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_filter(mut self, filter: ListenerFilter) -> Self {
		self.filter = filter;
		self
	}

	/// Acknowledged revision of `key`, 0 if never acknowledged.
	#[must_use]
	pub fn cursor(&self, key: &StreamKey) -> u64 {
		self.cursors
			.iter()
			.find(|cursor| &cursor.key == key)
			.map_or(0, |cursor| cursor.revision)
	}
}

/// What an acknowledgement did to the cursor of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeOutcome {
	pub key: StreamKey,
	pub previous: u64,
	pub revision: u64,
	pub advanced: bool,
}

#[async_trait]
pub trait ListenerStorage: Send + Sync + 'static {
	/// Registers a listener together with its initial cursors.
	async fn add_listener(&self, state: &ListenerState) -> Result<(), StorageError>;

	/// Replaces the description of a listener, its cursors only move through
	/// [`ListenerStorage::acknowledge`].
	async fn update_listener(&self, state: &ListenerState) -> Result<(), StorageError>;

	async fn get_listener(
		&self,
		parent_id: &str,
		listener_id: &str,
	) -> Result<Option<ListenerState>, StorageError>;

	async fn remove_listener(&self, parent_id: &str, listener_id: &str)
		-> Result<bool, StorageError>;

	async fn get_listeners(&self, parent_id: &str) -> Result<Vec<ListenerState>, StorageError>;

	async fn has_listener(&self, parent_id: &str, listener_id: &str) -> Result<bool, StorageError>;

	async fn has_listeners(&self, parent_id: &str) -> Result<bool, StorageError>;

	async fn get_parents(&self) -> Result<Vec<String>, StorageError>;

	/// Moves cursors forward, revisions at or below the current cursor are ignored.
	async fn acknowledge(
		&self,
		parent_id: &str,
		listener_id: &str,
		revisions: &[ListenerRevision],
		signal: Option<&CancellationToken>,
	) -> Result<Vec<AcknowledgeOutcome>, StorageError>;
}

#[derive(Debug, Clone)]
pub struct DbListenerStorage {
	db: Database,
	max_revisions_per_ack: usize,
}

impl DbListenerStorage {
	#[must_use]
	pub const fn new(db: Database, max_revisions_per_ack: usize) -> Self {
		Self {
			db,
			max_revisions_per_ack,
		}
	}

	async fn find<C: ConnectionTrait>(
		conn: &C,
		parent_id: &str,
		listener_id: &str,
	) -> Result<Option<listener::Model>, StorageError> {
		Ok(listener::Entity::find()
			.filter(listener::Column::ParentId.eq(parent_id))
			.filter(listener::Column::ListenerId.eq(listener_id))
			.one(conn)
			.await?)
	}

	async fn cursors<C: ConnectionTrait>(
		conn: &C,
		parent_id: &str,
		listener_id: &str,
	) -> Result<Vec<listener_cursor::Model>, StorageError> {
		Ok(listener_cursor::Entity::find()
			.filter(listener_cursor::Column::ParentId.eq(parent_id))
			.filter(listener_cursor::Column::ListenerId.eq(listener_id))
			.order_by_asc(listener_cursor::Column::Id)
			.all(conn)
			.await?)
	}

	async fn load<C: ConnectionTrait>(
		conn: &C,
		model: listener::Model,
	) -> Result<ListenerState, StorageError> {
		let cursors = Self::cursors(conn, &model.parent_id, &model.listener_id)
			.await?
			.into_iter()
			.map(|cursor| {
				Ok(ListenerRevision {
					revision: u64_from_db("revision", cursor.revision)?,
					key: StreamKey::new(cursor.document_id, cursor.scope, cursor.branch),
				})
			})
			.collect::<Result<_, StorageError>>()?;

		Ok(ListenerState {
			parent_id: model.parent_id,
			listener_id: model.listener_id,
			label: model.label,
			mode: model.mode,
			block: model.block,
			system: model.system,
			filter: serde_json::from_value(model.filter)?,
			call_info: model.call_info.map(serde_json::from_value).transpose()?,
			cursors,
		})
	}

	fn not_found(parent_id: &str, listener_id: &str) -> StorageError {
		StorageError::ListenerNotFound {
			parent_id: parent_id.to_string(),
			listener_id: listener_id.to_string(),
		}
	}
}

fn call_info_json(call_info: Option<&CallInfo>) -> Result<Option<Value>, StorageError> {
	Ok(call_info.map(serde_json::to_value).transpose()?)
}

#[async_trait]
impl ListenerStorage for DbListenerStorage {
	async fn add_listener(&self, state: &ListenerState) -> Result<(), StorageError> {
		let txn = self.db.conn().begin().await?;

		if Self::find(&txn, &state.parent_id, &state.listener_id)
			.await?
			.is_some()
		{
			return Err(StorageError::ListenerExists {
				parent_id: state.parent_id.clone(),
				listener_id: state.listener_id.clone(),
			});
		}

		let now = Utc::now();

		listener::ActiveModel {
			parent_id: Set(state.parent_id.clone()),
			listener_id: Set(state.listener_id.clone()),
			label: Set(state.label.clone()),
			mode: Set(state.mode),
			block: Set(state.block),
			system: Set(state.system),
			filter: Set(serde_json::to_value(&state.filter)?),
			call_info: Set(call_info_json(state.call_info.as_ref())?),
			created_at: Set(now),
			updated_at: Set(now),
			..Default::default()
		}
		.insert(&txn)
		.await?;

		for cursor in &state.cursors {
			listener_cursor::ActiveModel {
				parent_id: Set(state.parent_id.clone()),
				listener_id: Set(state.listener_id.clone()),
				document_id: Set(cursor.key.document_id.clone()),
				scope: Set(cursor.key.scope.clone()),
				branch: Set(cursor.key.branch.clone()),
				revision: Set(u64_to_db(cursor.revision)),
				updated_at: Set(now),
				..Default::default()
			}
			.insert(&txn)
			.await?;
		}

		txn.commit().await?;

		debug!(
			parent_id = %state.parent_id,
			listener_id = %state.listener_id,
			mode = ?state.mode,
			"Listener added",
		);

		Ok(())
	}

	async fn update_listener(&self, state: &ListenerState) -> Result<(), StorageError> {
		let existing = Self::find(self.db.conn(), &state.parent_id, &state.listener_id)
			.await?
			.ok_or_else(|| Self::not_found(&state.parent_id, &state.listener_id))?;

		let mut active = existing.into_active_model();
		active.label = Set(state.label.clone());
		active.mode = Set(state.mode);
		active.block = Set(state.block);
		active.system = Set(state.system);
		active.filter = Set(serde_json::to_value(&state.filter)?);
		active.call_info = Set(call_info_json(state.call_info.as_ref())?);
		active.updated_at = Set(Utc::now());
		active.update(self.db.conn()).await?;

		Ok(())
	}

	async fn get_listener(
		&self,
		parent_id: &str,
		listener_id: &str,
	) -> Result<Option<ListenerState>, StorageError> {
		match Self::find(self.db.conn(), parent_id, listener_id).await? {
			Some(model) => Self::load(self.db.conn(), model).await.map(Some),
			None => Ok(None),
		}
	}

	async fn remove_listener(
		&self,
		parent_id: &str,
		listener_id: &str,
	) -> Result<bool, StorageError> {
		let txn = self.db.conn().begin().await?;

		listener_cursor::Entity::delete_many()
			.filter(listener_cursor::Column::ParentId.eq(parent_id))
			.filter(listener_cursor::Column::ListenerId.eq(listener_id))
			.exec(&txn)
			.await?;

		let removed = listener::Entity::delete_many()
			.filter(listener::Column::ParentId.eq(parent_id))
			.filter(listener::Column::ListenerId.eq(listener_id))
			.exec(&txn)
			.await?
			.rows_affected > 0;

		txn.commit().await?;

		if removed {
			debug!(%parent_id, %listener_id, "Listener removed");
		}

		Ok(removed)
	}

	async fn get_listeners(&self, parent_id: &str) -> Result<Vec<ListenerState>, StorageError> {
		let models = listener::Entity::find()
			.filter(listener::Column::ParentId.eq(parent_id))
			.order_by_asc(listener::Column::Id)
			.all(self.db.conn())
			.await?;

		let mut listeners = Vec::with_capacity(models.len());
		for model in models {
			listeners.push(Self::load(self.db.conn(), model).await?);
		}

		Ok(listeners)
	}

	async fn has_listener(&self, parent_id: &str, listener_id: &str) -> Result<bool, StorageError> {
		Ok(Self::find(self.db.conn(), parent_id, listener_id)
			.await?
			.is_some())
	}

	async fn has_listeners(&self, parent_id: &str) -> Result<bool, StorageError> {
		Ok(listener::Entity::find()
			.filter(listener::Column::ParentId.eq(parent_id))
			.count(self.db.conn())
			.await? > 0)
	}

	async fn get_parents(&self) -> Result<Vec<String>, StorageError> {
		Ok(listener::Entity::find()
			.select_only()
			.column(listener::Column::ParentId)
			.distinct()
			.order_by_asc(listener::Column::ParentId)
			.into_tuple::<String>()
			.all(self.db.conn())
			.await?)
	}

	async fn acknowledge(
		&self,
		parent_id: &str,
		listener_id: &str,
		revisions: &[ListenerRevision],
		signal: Option<&CancellationToken>,
	) -> Result<Vec<AcknowledgeOutcome>, StorageError> {
		check_aborted(signal)?;

		if revisions.len() > self.max_revisions_per_ack {
			return Err(StorageError::TooManyRevisions {
				received: revisions.len(),
				max: self.max_revisions_per_ack,
			});
		}

		let txn = self.db.conn().begin().await?;

		if Self::find(&txn, parent_id, listener_id).await?.is_none() {
			return Err(Self::not_found(parent_id, listener_id));
		}

		let mut cursors = Self::cursors(&txn, parent_id, listener_id)
			.await?
			.into_iter()
			.map(|cursor| {
				(
					StreamKey::new(
						cursor.document_id.clone(),
						cursor.scope.clone(),
						cursor.branch.clone(),
					),
					cursor,
				)
			})
			.collect::<HashMap<_, _>>();

		let now = Utc::now();
		let mut outcomes = Vec::with_capacity(revisions.len());

		for ListenerRevision { key, revision } in revisions {
			let previous = match cursors.get(key) {
				Some(cursor) => u64_from_db("revision", cursor.revision)?,
				None => 0,
			};

			let advanced = *revision > previous;
			if advanced {
				let model = match cursors.remove(key) {
					Some(cursor) => {
						let mut active = cursor.into_active_model();
						active.revision = Set(u64_to_db(*revision));
						active.updated_at = Set(now);
						active.update(&txn).await?
					}
					None => {
						listener_cursor::ActiveModel {
							parent_id: Set(parent_id.to_string()),
							listener_id: Set(listener_id.to_string()),
							document_id: Set(key.document_id.clone()),
							scope: Set(key.scope.clone()),
							branch: Set(key.branch.clone()),
							revision: Set(u64_to_db(*revision)),
							updated_at: Set(now),
							..Default::default()
						}
						.insert(&txn)
						.await?
					}
				};
				cursors.insert(key.clone(), model);
			}

			trace!(%listener_id, %key, previous, revision, advanced, "Acknowledged");

			outcomes.push(AcknowledgeOutcome {
				key: key.clone(),
				previous,
				revision: previous.max(*revision),
				advanced,
			});
		}

		// dropping the transaction rolls every cursor back
		check_aborted(signal)?;
		txn.commit().await?;

		Ok(outcomes)
	}
}
