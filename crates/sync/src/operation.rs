use std::{fmt, hash::Hash};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Position of an operation inside the history of a (document, scope, branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationIndex {
	pub index: u64,
	pub skip: u64,
}

impl OperationIndex {
	#[must_use]
	pub const fn new(index: u64, skip: u64) -> Self {
		Self { index, skip }
	}
}

impl fmt::Display for OperationIndex {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.index, self.skip)
	}
}

/// Anything that can be ordered, garbage collected and reshuffled like an operation.
///
/// The algorithms in this crate only ever look at these accessors, so callers can run them on
/// lightweight index tuples as well as on full [`Operation`]s.
pub trait OperationIndexed {
	type Id: Eq + Hash + Ord + Clone;

	fn id(&self) -> &Self::Id;

	fn index(&self) -> u64;

	fn skip(&self) -> u64;

	fn timestamp_utc_ms(&self) -> i64;

	fn set_position(&mut self, position: OperationIndex);

	fn position(&self) -> OperationIndex {
		OperationIndex::new(self.index(), self.skip())
	}

	/// Whether two operations describe the same step of history, used to find the common prefix
	/// of two branches.
	fn same_operation(&self, other: &Self) -> bool {
		self.index() == other.index() && self.skip() == other.skip()
	}
}

/// Opaque signature attached to an action by a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
	pub signer: String,
	pub value: String,
}

/// A user intent, interpreted only by the reducer of the document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
	pub id: Uuid,
	#[serde(rename = "type")]
	pub action_type: String,
	pub scope: String,
	pub input: Value,
	pub timestamp_utc_ms: i64,
	#[serde(default)]
	pub signatures: Vec<Signature>,
}

impl Action {
	pub fn new(action_type: impl Into<String>, scope: impl Into<String>, input: Value) -> Self {
		Self {
			id: Uuid::new_v4(),
			action_type: action_type.into(),
			scope: scope.into(),
			input,
			timestamp_utc_ms: Utc::now().timestamp_millis(),
			signatures: Vec::new(),
		}
	}
}

/// Link of the hash chain, hex encoded blake3 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(String);

impl OpId {
	/// Derives the id of an operation from its coordinates, its action and the previous link.
	#[must_use]
	pub fn derive(
		document_id: &str,
		scope: &str,
		branch: &str,
		position: OperationIndex,
		action_id: &Uuid,
		prev: Option<&Self>,
	) -> Self {
		let mut hasher = blake3::Hasher::new();

		for part in [document_id, scope, branch] {
			hasher.update(part.as_bytes());
			hasher.update(&[0]);
		}

		hasher.update(&position.index.to_le_bytes());
		hasher.update(&position.skip.to_le_bytes());
		hasher.update(action_id.as_bytes());

		if let Some(prev) = prev {
			hasher.update(prev.0.as_bytes());
		}

		Self(hasher.finalize().to_hex().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for OpId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for OpId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// One applied action in the log of a (document, scope, branch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
	pub op_id: OpId,
	pub prev_op_id: Option<OpId>,
	pub job_id: Option<Uuid>,
	pub document_id: String,
	pub document_type: String,
	pub scope: String,
	pub branch: String,
	pub index: u64,
	pub skip: u64,
	pub timestamp_utc_ms: i64,
	pub action: Action,
	pub error: Option<String>,
	/// Hash of the document state after this operation was applied.
	pub hash: String,
}

impl Operation {
	/// The op id this operation should carry given its current position and previous link.
	#[must_use]
	pub fn expected_op_id(&self) -> OpId {
		OpId::derive(
			&self.document_id,
			&self.scope,
			&self.branch,
			self.position(),
			&self.action.id,
			self.prev_op_id.as_ref(),
		)
	}

	#[must_use]
	pub const fn is_failed(&self) -> bool {
		self.error.is_some()
	}
}

impl OperationIndexed for Operation {
	type Id = Uuid;

	// Operations are identified by the action they applied, their op id changes whenever the
	// history gets re-linearized.
	fn id(&self) -> &Uuid {
		&self.action.id
	}

	fn index(&self) -> u64 {
		self.index
	}

	fn skip(&self) -> u64 {
		self.skip
	}

	fn timestamp_utc_ms(&self) -> i64 {
		self.timestamp_utc_ms
	}

	fn set_position(&mut self, position: OperationIndex) {
		self.index = position.index;
		self.skip = position.skip;
	}

	fn same_operation(&self, other: &Self) -> bool {
		self.index == other.index
			&& self.skip == other.skip
			&& self.action.action_type == other.action.action_type
			&& self.action.scope == other.action.scope
			&& self.action.input == other.action.input
	}
}
