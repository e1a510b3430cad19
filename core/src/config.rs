//! Reactor configuration
//!
//! Persisted as TOML. Every section falls back to its defaults, so a config file only needs the
//! keys it wants to change.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to access config file <path='{}'>: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse config file: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("failed to serialize config: {0}")]
	Serialize(#[from] toml::ser::Error),
	#[error("invalid config: {0}")]
	Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
	/// Config schema version
	pub version: u32,

	/// Filter used when `RUST_LOG` is not set
	pub log_level: String,

	/// sea-orm connection url of the operation store
	pub database_url: String,

	pub executor: ExecutorConfig,

	pub cache: CacheConfig,

	pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
	pub max_concurrency: usize,
	pub job_timeout_ms: u64,
	pub retry_base_delay_ms: u64,
	pub retry_max_delay_ms: u64,
	pub max_retries: u32,
	pub shutdown_grace_ms: u64,
	/// Most local operations a load may reshuffle before it is refused
	pub max_skip_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Streams kept in memory before the least recently used one is evicted
	pub max_documents: usize,
	/// Recent revisions kept per stream
	pub ring_buffer_size: usize,
	/// A keyframe is persisted every `keyframe_interval` revisions
	pub keyframe_interval: u64,
	/// Log every Nth keyframe write, 0 disables sampling
	pub keyframe_sample_every: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	pub max_revisions_per_ack: usize,
	pub pull_batch_size: u64,
}

impl Default for ReactorConfig {
	fn default() -> Self {
		Self {
			version: Self::CURRENT_VERSION,
			log_level: "info".to_string(),
			database_url: "sqlite::memory:".to_string(),
			executor: ExecutorConfig::default(),
			cache: CacheConfig::default(),
			sync: SyncConfig::default(),
		}
	}
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			max_concurrency: 1,
			job_timeout_ms: 30_000,
			retry_base_delay_ms: 100,
			retry_max_delay_ms: 5_000,
			max_retries: 3,
			shutdown_grace_ms: 5_000,
			max_skip_threshold: 1_000,
		}
	}
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			max_documents: 1_000,
			ring_buffer_size: 10,
			keyframe_interval: 10,
			keyframe_sample_every: 0,
		}
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			max_revisions_per_ack: 100,
			pull_batch_size: 500,
		}
	}
}

impl ExecutorConfig {
	#[must_use]
	pub const fn job_timeout(&self) -> Duration {
		Duration::from_millis(self.job_timeout_ms)
	}

	#[must_use]
	pub const fn shutdown_grace(&self) -> Duration {
		Duration::from_millis(self.shutdown_grace_ms)
	}

	/// Delay before retry number `retry` (starting at 1), doubling from the base delay and
	/// capped at the max delay.
	#[must_use]
	pub fn retry_delay(&self, retry: u32) -> Duration {
		let factor = 1_u64
			.checked_shl(retry.saturating_sub(1))
			.unwrap_or(u64::MAX);

		Duration::from_millis(
			self.retry_base_delay_ms
				.saturating_mul(factor)
				.min(self.retry_max_delay_ms),
		)
	}
}

impl ReactorConfig {
	pub const CURRENT_VERSION: u32 = 1;

	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		info!(path = %path.display(), "Loading reactor config");

		let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;

		let config = toml::from_str::<Self>(&raw)?;
		config.validate()?;

		Ok(config)
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
				path: parent.to_path_buf(),
				source,
			})?;
		}

		fs::write(path, toml::to_string_pretty(self)?).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;

		info!(path = %path.display(), "Saved reactor config");

		Ok(())
	}

	pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		if path.exists() {
			return Self::load_from(path);
		}

		warn!(path = %path.display(), "No config found, creating default");
		let config = Self::default();
		config.save(path)?;

		Ok(config)
	}

	pub const fn validate(&self) -> Result<(), ConfigError> {
		if self.executor.max_concurrency == 0 {
			return Err(ConfigError::Invalid("executor.max_concurrency must be at least 1"));
		}

		if self.executor.retry_base_delay_ms > self.executor.retry_max_delay_ms {
			return Err(ConfigError::Invalid(
				"executor.retry_base_delay_ms must not exceed executor.retry_max_delay_ms",
			));
		}

		if self.cache.keyframe_interval == 0 {
			return Err(ConfigError::Invalid("cache.keyframe_interval must be at least 1"));
		}

		if self.cache.ring_buffer_size == 0 {
			return Err(ConfigError::Invalid("cache.ring_buffer_size must be at least 1"));
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retry_delay_doubles_until_capped() {
		let config = ExecutorConfig {
			retry_base_delay_ms: 100,
			retry_max_delay_ms: 1_000,
			..Default::default()
		};

		let delays = (1..=6)
			.map(|retry| config.retry_delay(retry).as_millis())
			.collect::<Vec<_>>();

		assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
		assert_eq!(config.retry_delay(200).as_millis(), 1_000);
	}

	#[test]
	fn partial_file_takes_defaults() {
		let dir = tempfile::tempdir().expect("temp dir");
		let path = dir.path().join("reactor.toml");

		fs::write(
			&path,
			"log_level = \"debug\"\n\n[executor]\nmax_concurrency = 4\n",
		)
		.expect("write config");

		let config = ReactorConfig::load_from(&path).expect("load config");

		assert_eq!(config.log_level, "debug");
		assert_eq!(config.executor.max_concurrency, 4);
		assert_eq!(config.executor.job_timeout_ms, 30_000);
		assert_eq!(config.cache, CacheConfig::default());
	}

	#[test]
	fn load_or_create_round_trips() {
		let dir = tempfile::tempdir().expect("temp dir");
		let path = dir.path().join("nested").join("reactor.toml");

		let created = ReactorConfig::load_or_create(&path).expect("create config");
		let loaded = ReactorConfig::load_or_create(&path).expect("load config");

		assert_eq!(created, loaded);
	}

	#[test]
	fn rejects_invalid_values() {
		let mut config = ReactorConfig::default();
		config.executor.max_concurrency = 0;
		assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

		let mut config = ReactorConfig::default();
		config.executor.retry_base_delay_ms = 10_000;
		assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
	}
}
