use std::fmt;

use reactor_sync::Operation;

use serde::{Deserialize, Serialize};

/// Identifies one operation stream, the history of a (document, scope, branch).
///
/// Also the contention key of the job queue: jobs sharing a key never execute at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
	pub document_id: String,
	pub scope: String,
	pub branch: String,
}

impl StreamKey {
	pub fn new(
		document_id: impl Into<String>,
		scope: impl Into<String>,
		branch: impl Into<String>,
	) -> Self {
		Self {
			document_id: document_id.into(),
			scope: scope.into(),
			branch: branch.into(),
		}
	}

	#[must_use]
	pub fn of(operation: &Operation) -> Self {
		Self::new(
			operation.document_id.clone(),
			operation.scope.clone(),
			operation.branch.clone(),
		)
	}

	#[must_use]
	pub fn contains(&self, operation: &Operation) -> bool {
		self.document_id == operation.document_id
			&& self.scope == operation.scope
			&& self.branch == operation.branch
	}
}

impl fmt::Display for StreamKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.document_id, self.scope, self.branch)
	}
}
