//! Database infrastructure using SeaORM

use std::{path::Path, time::Duration};

use sea_orm::{ConnectOptions, Database as SeaDatabase, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use super::store::StorageError;

pub mod entities;
pub mod migration;

/// Connection to the reactor database, always migrated to the latest schema
#[derive(Debug, Clone)]
pub struct Database {
	conn: DatabaseConnection,
}

impl Database {
	/// Connects to `url` and runs every pending migration.
	///
	/// A database that can't be migrated is never handed out.
	pub async fn open(url: &str) -> Result<Self, StorageError> {
		let mut opt = ConnectOptions::new(url.to_owned());

		if url.contains(":memory:") {
			// Every pooled connection would get its own empty in-memory database
			opt.max_connections(1).min_connections(1);
		} else {
			opt.max_connections(10)
				.min_connections(1)
				.connect_timeout(Duration::from_secs(8))
				.idle_timeout(Duration::from_secs(8));
		}

		opt.sqlx_logging(false);

		let conn = SeaDatabase::connect(opt).await?;

		migration::Migrator::up(&conn, None)
			.await
			.map_err(StorageError::Migration)?;

		info!(%url, "Database opened and migrated");

		Ok(Self { conn })
	}

	/// Creates (or opens) a SQLite database file at `path`
	pub async fn create(path: &Path) -> Result<Self, StorageError> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| DbErr::Custom(format!("Failed to create directory: {e}")))?;
		}

		Self::open(&format!("sqlite://{}?mode=rwc", path.display())).await
	}

	/// In-memory database, mostly for tests
	pub async fn in_memory() -> Result<Self, StorageError> {
		Self::open("sqlite::memory:").await
	}

	#[must_use]
	pub const fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}
}
