use std::collections::{hash_map::Entry, HashMap};

use serde_json::Value;

use super::{
	error::Error,
	operation::{OpId, Operation, OperationIndex, OperationIndexed},
};

/// Checks that `operations` extend `head` as an untampered hash chain.
///
/// Every `prev_op_id` must point at the op id of the previous operation (or at `head` for the
/// first one) and every op id must be the one derived from the operation's own contents.
pub fn verify_chain(operations: &[Operation], head: Option<&OpId>) -> Result<(), Error> {
	let mut expected = head;

	for op in operations {
		if op.prev_op_id.as_ref() != expected {
			return Err(Error::BrokenChain {
				index: op.index,
				expected: expected.map_or_else(|| "none".to_string(), ToString::to_string),
				found: op
					.prev_op_id
					.as_ref()
					.map_or_else(|| "none".to_string(), ToString::to_string),
			});
		}

		if op.op_id != op.expected_op_id() {
			return Err(Error::Tampered {
				index: op.index,
				op_id: op.op_id.clone(),
			});
		}

		expected = Some(&op.op_id);
	}

	Ok(())
}

/// Re-derives `prev_op_id` and `op_id` of every operation so they chain on top of `head`.
///
/// Needed after a reshuffle, since positions are part of the op id.
pub fn relink(operations: &mut [Operation], head: Option<OpId>) {
	let mut prev = head;

	for op in operations {
		op.prev_op_id = prev.take();
		op.op_id = op.expected_op_id();
		prev = Some(op.op_id.clone());
	}
}

/// Positions claimed by two different operations.
#[must_use]
pub fn detect_conflicts<T: OperationIndexed>(operations: &[T]) -> Vec<OperationIndex> {
	let mut seen = HashMap::with_capacity(operations.len());
	let mut conflicts = Vec::new();

	for op in operations {
		match seen.entry(op.position()) {
			Entry::Vacant(entry) => {
				entry.insert(op.id());
			}
			Entry::Occupied(entry) => {
				if *entry.get() != op.id() && !conflicts.contains(entry.key()) {
					conflicts.push(*entry.key());
				}
			}
		}
	}

	conflicts
}

/// Hash of a document state, stored alongside every operation.
#[must_use]
pub fn state_hash(state: &Value) -> String {
	// serde_json keeps map keys sorted without the `preserve_order` feature
	blake3::hash(state.to_string().as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::operation::Action;

	use super::*;

	fn chain(len: u64) -> Vec<Operation> {
		let mut ops = (0..len)
			.map(|index| Operation {
				op_id: OpId::from(String::new()),
				prev_op_id: None,
				job_id: None,
				document_id: "doc".to_string(),
				document_type: "test/counter".to_string(),
				scope: "global".to_string(),
				branch: "main".to_string(),
				index,
				skip: 0,
				timestamp_utc_ms: 0,
				action: Action::new("INCREMENT", "global", json!({})),
				error: None,
				hash: String::new(),
			})
			.collect::<Vec<_>>();

		relink(&mut ops, None);
		ops
	}

	#[test]
	fn relinked_chain_verifies() {
		let ops = chain(4);

		assert!(ops[0].prev_op_id.is_none());
		assert_eq!(ops[3].prev_op_id.as_ref(), Some(&ops[2].op_id));
		assert!(verify_chain(&ops, None).is_ok());
		assert!(verify_chain(&ops[2..], Some(&ops[1].op_id)).is_ok());
	}

	#[test]
	fn tampered_operation_is_detected() {
		let mut ops = chain(3);
		ops[1].skip = 1;

		assert!(matches!(
			verify_chain(&ops, None),
			Err(Error::Tampered { index: 1, .. })
		));
	}

	#[test]
	fn missing_link_is_detected() {
		let ops = chain(3);

		assert!(matches!(
			verify_chain(&ops[1..], None),
			Err(Error::BrokenChain { index: 1, .. })
		));
	}

	#[test]
	fn conflicting_positions_are_reported_once() {
		let mut ops = chain(3);
		let mut rival = ops[1].clone();
		rival.action.id = uuid::Uuid::new_v4();
		ops.push(rival.clone());
		ops.push(rival);
		// the same operation twice is not a conflict
		ops.push(ops[0].clone());

		assert_eq!(detect_conflicts(&ops), vec![OperationIndex::new(1, 0)]);
	}

	#[test]
	fn state_hash_ignores_key_order() {
		assert_eq!(
			state_hash(&json!({ "a": 1, "b": 2 })),
			state_hash(&json!({ "b": 2, "a": 1 }))
		);
		assert_ne!(state_hash(&json!({ "a": 1 })), state_hash(&json!({ "a": 2 })));
	}
}
