//!
//! # Reactor Sync
//!
//! Operation model and the pure algorithms that keep a document's operation history ordered.
//!
//! Nothing in this crate performs I/O. Storage, scheduling and replication live in `reactor-core`
//! and call into here whenever a sequence of operations has to be sorted, re-linearized after two
//! branches diverged, or checked for tampering.
//!
//! - [`sort_operations`] gives the canonical replay order;
//! - [`reshuffle_by_timestamp`] and [`reshuffle_by_timestamp_and_index`] re-linearize two divergent
//!   histories into one;
//! - [`merge`] garbage-collects, splits and reshuffles two histories sharing a common prefix;
//! - [`verify_chain`] and [`relink`] maintain the `prev_op_id` hash chain.
//!
//! ## Example
//!
//! ```
//! use reactor_sync::{reshuffle_by_timestamp, OperationIndex, OperationIndexed};
//!
//! #[derive(Debug, Clone)]
//! struct Op {
//!     id: u32,
//!     index: u64,
//!     skip: u64,
//!     timestamp: i64,
//! }
//!
//! impl OperationIndexed for Op {
//!     type Id = u32;
//!
//!     fn id(&self) -> &u32 { &self.id }
//!     fn index(&self) -> u64 { self.index }
//!     fn skip(&self) -> u64 { self.skip }
//!     fn timestamp_utc_ms(&self) -> i64 { self.timestamp }
//!     fn set_position(&mut self, position: OperationIndex) {
//!         self.index = position.index;
//!         self.skip = position.skip;
//!     }
//! }
//!
//! let a = vec![Op { id: 1, index: 0, skip: 0, timestamp: 10 }];
//! let b = vec![Op { id: 2, index: 0, skip: 0, timestamp: 5 }];
//!
//! let result = reshuffle_by_timestamp(OperationIndex::new(3, 1), a, b);
//!
//! assert_eq!(result[0].id, 2);
//! assert_eq!((result[0].index, result[0].skip), (3, 1));
//! assert_eq!((result[1].index, result[1].skip), (4, 0));
//! ```

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
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod chain;
mod error;
mod merge;
mod operation;
mod order;

pub use chain::{detect_conflicts, relink, state_hash, verify_chain};
pub use error::Error as ReactorSyncError;
pub use merge::{garbage_collect, merge, next_skip_number, split, Split};
pub use operation::{Action, OpId, Operation, OperationIndex, OperationIndexed, Signature};
pub use order::{reshuffle_by_timestamp, reshuffle_by_timestamp_and_index, sort_operations, Reshuffle};
