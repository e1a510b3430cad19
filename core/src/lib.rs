#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(
	clippy::missing_errors_doc,
	clippy::module_name_repetitions,
	clippy::future_not_send
)]

//! # Reactor Core
//!
//! Turns actions into an ordered, hash-chained operation log per (document, scope, branch),
//! executes them concurrently across documents, keeps snapshots and keyframes derived from the log
//! and replicates new operations to registered listeners.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod reactor;
pub mod service;

pub use client::{BuilderError, ReactorClient, ReactorClientBuilder, SubscriptionManager};
pub use config::ReactorConfig;
pub use error::{Error, Result};
pub use reactor::Reactor;

pub use reactor_sync as sync;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured log level. Does nothing if a subscriber is already set.
pub fn init_tracing(config: &ReactorConfig) {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(&config.log_level))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_target(true))
		.try_init();
}
