//! Operation log, snapshot, keyframe and listener tables

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Operation::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Operation::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Operation::JobId).uuid())
					.col(ColumnDef::new(Operation::OpId).string().not_null().unique_key())
					.col(ColumnDef::new(Operation::PrevOpId).string())
					.col(ColumnDef::new(Operation::DocumentId).string().not_null())
					.col(ColumnDef::new(Operation::DocumentType).string().not_null())
					.col(ColumnDef::new(Operation::Scope).string().not_null())
					.col(ColumnDef::new(Operation::Branch).string().not_null())
					.col(ColumnDef::new(Operation::Index).big_integer().not_null())
					.col(ColumnDef::new(Operation::Skip).big_integer().not_null())
					.col(ColumnDef::new(Operation::TimestampUtcMs).big_integer().not_null())
					.col(ColumnDef::new(Operation::Action).text().not_null())
					.col(ColumnDef::new(Operation::Error).text())
					.col(ColumnDef::new(Operation::Hash).string().not_null())
					.col(
						ColumnDef::new(Operation::WriteTimestampUtcMs)
							.big_integer()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		// One operation per position of a stream
		manager
			.create_index(
				Index::create()
					.name("idx_operation_stream_index")
					.table(Operation::Table)
					.col(Operation::DocumentId)
					.col(Operation::Scope)
					.col(Operation::Branch)
					.col(Operation::Index)
					.unique()
					.to_owned(),
			)
			.await?;

		// Streaming reads in insertion order
		manager
			.create_index(
				Index::create()
					.name("idx_operation_stream_id")
					.table(Operation::Table)
					.col(Operation::DocumentId)
					.col(Operation::Scope)
					.col(Operation::Branch)
					.col(Operation::Id)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_operation_job_id")
					.table(Operation::Table)
					.col(Operation::JobId)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(DocumentSnapshot::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(DocumentSnapshot::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(DocumentSnapshot::DocumentId).string().not_null())
					.col(ColumnDef::new(DocumentSnapshot::Scope).string().not_null())
					.col(ColumnDef::new(DocumentSnapshot::Branch).string().not_null())
					.col(ColumnDef::new(DocumentSnapshot::Content).text().not_null())
					.col(ColumnDef::new(DocumentSnapshot::DocumentType).string().not_null())
					.col(
						ColumnDef::new(DocumentSnapshot::LastOperationIndex)
							.big_integer()
							.not_null(),
					)
					.col(
						ColumnDef::new(DocumentSnapshot::LastOperationHash)
							.string()
							.not_null(),
					)
					.col(
						ColumnDef::new(DocumentSnapshot::SnapshotVersion)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(DocumentSnapshot::Identifiers).text())
					.col(ColumnDef::new(DocumentSnapshot::Metadata).text())
					.col(
						ColumnDef::new(DocumentSnapshot::IsDeleted)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(ColumnDef::new(DocumentSnapshot::DeletedAt).timestamp_with_time_zone())
					.col(
						ColumnDef::new(DocumentSnapshot::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_document_snapshot_stream")
					.table(DocumentSnapshot::Table)
					.col(DocumentSnapshot::DocumentId)
					.col(DocumentSnapshot::Scope)
					.col(DocumentSnapshot::Branch)
					.unique()
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Keyframe::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Keyframe::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Keyframe::DocumentId).string().not_null())
					.col(ColumnDef::new(Keyframe::DocumentType).string().not_null())
					.col(ColumnDef::new(Keyframe::Scope).string().not_null())
					.col(ColumnDef::new(Keyframe::Branch).string().not_null())
					.col(ColumnDef::new(Keyframe::Revision).big_integer().not_null())
					.col(ColumnDef::new(Keyframe::Document).text().not_null())
					.col(
						ColumnDef::new(Keyframe::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_keyframe_stream_revision")
					.table(Keyframe::Table)
					.col(Keyframe::DocumentId)
					.col(Keyframe::Scope)
					.col(Keyframe::Branch)
					.col(Keyframe::Revision)
					.unique()
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Listener::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Listener::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Listener::ParentId).string().not_null())
					.col(ColumnDef::new(Listener::ListenerId).string().not_null())
					.col(ColumnDef::new(Listener::Label).string())
					.col(ColumnDef::new(Listener::Mode).string().not_null())
					.col(
						ColumnDef::new(Listener::Block)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(
						ColumnDef::new(Listener::System)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(ColumnDef::new(Listener::Filter).text().not_null())
					.col(ColumnDef::new(Listener::CallInfo).text())
					.col(
						ColumnDef::new(Listener::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(Listener::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_listener_parent_listener")
					.table(Listener::Table)
					.col(Listener::ParentId)
					.col(Listener::ListenerId)
					.unique()
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(ListenerCursor::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(ListenerCursor::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(ListenerCursor::ParentId).string().not_null())
					.col(ColumnDef::new(ListenerCursor::ListenerId).string().not_null())
					.col(ColumnDef::new(ListenerCursor::DocumentId).string().not_null())
					.col(ColumnDef::new(ListenerCursor::Scope).string().not_null())
					.col(ColumnDef::new(ListenerCursor::Branch).string().not_null())
					.col(ColumnDef::new(ListenerCursor::Revision).big_integer().not_null())
					.col(
						ColumnDef::new(ListenerCursor::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_listener_cursor_unit")
					.table(ListenerCursor::Table)
					.col(ListenerCursor::ParentId)
					.col(ListenerCursor::ListenerId)
					.col(ListenerCursor::DocumentId)
					.col(ListenerCursor::Scope)
					.col(ListenerCursor::Branch)
					.unique()
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(ListenerCursor::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Listener::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Keyframe::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(DocumentSnapshot::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Operation::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum Operation {
	Table,
	Id,
	JobId,
	OpId,
	PrevOpId,
	DocumentId,
	DocumentType,
	Scope,
	Branch,
	Index,
	Skip,
	TimestampUtcMs,
	Action,
	Error,
	Hash,
	WriteTimestampUtcMs,
}

#[derive(DeriveIden)]
enum DocumentSnapshot {
	Table,
	Id,
	DocumentId,
	Scope,
	Branch,
	Content,
	DocumentType,
	LastOperationIndex,
	LastOperationHash,
	SnapshotVersion,
	Identifiers,
	Metadata,
	IsDeleted,
	DeletedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum Keyframe {
	Table,
	Id,
	DocumentId,
	DocumentType,
	Scope,
	Branch,
	Revision,
	Document,
	CreatedAt,
}

#[derive(DeriveIden)]
enum Listener {
	Table,
	Id,
	ParentId,
	ListenerId,
	Label,
	Mode,
	Block,
	System,
	Filter,
	CallInfo,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum ListenerCursor {
	Table,
	Id,
	ParentId,
	ListenerId,
	DocumentId,
	Scope,
	Branch,
	Revision,
	UpdatedAt,
}
