//! Materialized state of a (document, scope, branch)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_snapshot")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i64,

	pub document_id: String,

	pub scope: String,

	pub branch: String,

	#[sea_orm(column_type = "Json")]
	pub content: Json,

	pub document_type: String,

	/// Index of the last operation folded into `content`
	pub last_operation_index: i64,

	/// Op id of the last operation folded into `content`
	pub last_operation_hash: String,

	pub snapshot_version: i64,

	#[sea_orm(column_type = "Json", nullable)]
	pub identifiers: Option<Json>,

	#[sea_orm(column_type = "Json", nullable)]
	pub metadata: Option<Json>,

	pub is_deleted: bool,

	pub deleted_at: Option<DateTimeUtc>,

	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
