//! Full state checkpoints at a revision

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "keyframe")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i64,

	pub document_id: String,

	pub document_type: String,

	pub scope: String,

	pub branch: String,

	pub revision: i64,

	#[sea_orm(column_type = "Json")]
	pub document: Json,

	pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
