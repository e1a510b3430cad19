//! Replication targets registered against a parent (drive)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "listener")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i64,

	pub parent_id: String,

	pub listener_id: String,

	pub label: Option<String>,

	pub mode: ListenerMode,

	pub block: bool,

	pub system: bool,

	/// Serialized `ListenerFilter`
	#[sea_orm(column_type = "Json")]
	pub filter: Json,

	#[sea_orm(column_type = "Json", nullable)]
	pub call_info: Option<Json>,

	pub created_at: DateTimeUtc,

	pub updated_at: DateTimeUtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ListenerMode {
	#[sea_orm(string_value = "push")]
	Push,
	#[sea_orm(string_value = "pull")]
	Pull,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
