//! Last acknowledged revision of a listener, per synchronization unit

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "listener_cursor")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i64,

	pub parent_id: String,

	pub listener_id: String,

	pub document_id: String,

	pub scope: String,

	pub branch: String,

	pub revision: i64,

	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
