use thiserror::Error;

use crate::{
	client::BuilderError,
	config::ConfigError,
	domain::SignerError,
	infra::{
		cache::CacheError,
		event::EventBusError,
		job::{JobError, JobId},
		queue::QueueError,
		store::StorageError,
	},
	service::sync::SyncError,
};

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	Job(#[from] JobError),
	#[error(transparent)]
	Cache(#[from] CacheError),
	#[error(transparent)]
	EventBus(#[from] EventBusError),
	#[error(transparent)]
	Sync(#[from] SyncError),
	#[error(transparent)]
	Builder(#[from] BuilderError),
	#[error(transparent)]
	Signer(#[from] SignerError),
	#[error("no actions to execute")]
	NoActions,
	#[error("no operations to load")]
	NoOperations,
	#[error("job failed <id='{job_id}'>: {error}")]
	JobFailed { job_id: JobId, error: String },
}

pub type Result<T> = std::result::Result<T, Error>;
