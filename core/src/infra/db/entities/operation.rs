//! Operation log entity
//!
//! Append-only, one row per applied action. `(document_id, scope, branch, index)` is unique and
//! `prev_op_id` links every row to the previous one of its stream.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operation")]
pub struct Model {
	/// Internal database ID (auto-increment), also the streaming order
	#[sea_orm(primary_key)]
	pub id: i64,

	#[sea_orm(indexed, nullable)]
	pub job_id: Option<Uuid>,

	#[sea_orm(unique)]
	pub op_id: String,

	pub prev_op_id: Option<String>,

	pub document_id: String,

	pub document_type: String,

	pub scope: String,

	pub branch: String,

	pub index: i64,

	pub skip: i64,

	pub timestamp_utc_ms: i64,

	/// Serialized `reactor_sync::Action`
	#[sea_orm(column_type = "Json")]
	pub action: Json,

	pub error: Option<String>,

	pub hash: String,

	pub write_timestamp_utc_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
