use std::cmp::Ordering;

use super::operation::{OperationIndex, OperationIndexed};

/// Canonical replay order: `[0:0 2:0 1:0 3:3 3:1]` becomes `[0:0 1:0 2:0 3:1 3:3]`.
///
/// Equivalent to a stable sort by skip followed by a stable sort by index.
#[must_use]
pub fn sort_operations<T: OperationIndexed>(mut operations: Vec<T>) -> Vec<T> {
	operations.sort_by(|a, b| {
		a.index()
			.cmp(&b.index())
			.then_with(|| a.skip().cmp(&b.skip()))
	});
	operations
}

/// Strategy used by [`crate::merge`] to re-linearize the divergent tails of two histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reshuffle {
	#[default]
	ByTimestamp,
	ByTimestampAndIndex,
}

impl Reshuffle {
	#[must_use]
	pub fn apply<T: OperationIndexed>(self, start: OperationIndex, a: Vec<T>, b: Vec<T>) -> Vec<T> {
		match self {
			Self::ByTimestamp => reshuffle_by_timestamp(start, a, b),
			Self::ByTimestampAndIndex => reshuffle_by_timestamp_and_index(start, a, b),
		}
	}
}

/// Interleaves both sequences by wall clock time and renumbers them from `start`.
///
/// The first resulting operation takes `start.skip`, every following one has skip 0. Operations
/// with the same timestamp are ordered by id so every replica produces the same sequence
/// regardless of which side is `a`.
#[must_use]
pub fn reshuffle_by_timestamp<T: OperationIndexed>(
	start: OperationIndex,
	a: Vec<T>,
	b: Vec<T>,
) -> Vec<T> {
	reshuffle(start, a, b, |x, y| {
		x.timestamp_utc_ms()
			.cmp(&y.timestamp_utc_ms())
			.then_with(|| x.id().cmp(y.id()))
	})
}

/// Like [`reshuffle_by_timestamp`], but timestamp ties keep the original index order.
#[must_use]
pub fn reshuffle_by_timestamp_and_index<T: OperationIndexed>(
	start: OperationIndex,
	a: Vec<T>,
	b: Vec<T>,
) -> Vec<T> {
	reshuffle(start, a, b, |x, y| {
		x.timestamp_utc_ms()
			.cmp(&y.timestamp_utc_ms())
			.then_with(|| x.index().cmp(&y.index()))
			.then_with(|| x.id().cmp(y.id()))
	})
}

fn reshuffle<T, F>(start: OperationIndex, a: Vec<T>, b: Vec<T>, compare: F) -> Vec<T>
where
	T: OperationIndexed,
	F: Fn(&T, &T) -> Ordering,
{
	let mut operations = a.into_iter().chain(b).collect::<Vec<_>>();
	operations.sort_by(compare);

	for (offset, (operation, index)) in operations.iter_mut().zip(start.index..).enumerate() {
		let skip = if offset == 0 { start.skip } else { 0 };
		operation.set_position(OperationIndex::new(index, skip));
	}

	operations
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq, Eq)]
	pub struct Op {
		pub id: &'static str,
		pub index: u64,
		pub skip: u64,
		pub timestamp: i64,
	}

	pub fn op(id: &'static str, index: u64, skip: u64, timestamp: i64) -> Op {
		Op {
			id,
			index,
			skip,
			timestamp,
		}
	}

	impl OperationIndexed for Op {
		type Id = &'static str;

		fn id(&self) -> &Self::Id {
			&self.id
		}

		fn index(&self) -> u64 {
			self.index
		}

		fn skip(&self) -> u64 {
			self.skip
		}

		fn timestamp_utc_ms(&self) -> i64 {
			self.timestamp
		}

		fn set_position(&mut self, position: OperationIndex) {
			self.index = position.index;
			self.skip = position.skip;
		}
	}

	pub fn positions(ops: &[Op]) -> Vec<(u64, u64)> {
		ops.iter().map(|op| (op.index, op.skip)).collect()
	}

	#[test]
	fn sorts_by_index_then_skip() {
		let sorted = sort_operations(vec![
			op("a", 0, 0, 0),
			op("b", 2, 0, 0),
			op("c", 1, 0, 0),
			op("d", 3, 3, 0),
			op("e", 3, 1, 0),
		]);

		assert_eq!(
			positions(&sorted),
			vec![(0, 0), (1, 0), (2, 0), (3, 1), (3, 3)]
		);
	}

	#[test]
	fn sort_is_idempotent() {
		let ops = vec![
			op("a", 5, 1, 0),
			op("b", 1, 0, 0),
			op("c", 5, 0, 0),
			op("d", 0, 0, 0),
			op("e", 1, 0, 0),
		];

		let once = sort_operations(ops);
		let twice = sort_operations(once.clone());

		assert_eq!(once, twice);
	}

	#[test]
	fn reshuffle_interleaves_by_timestamp() {
		let a = vec![op("a0", 0, 0, 1000), op("a1", 1, 0, 2000)];
		let b = vec![op("b0", 0, 0, 1500)];

		let result = reshuffle_by_timestamp(OperationIndex::new(0, 0), a, b);

		assert_eq!(
			result.iter().map(|op| op.id).collect::<Vec<_>>(),
			vec!["a0", "b0", "a1"]
		);
		assert_eq!(positions(&result), vec![(0, 0), (1, 0), (2, 0)]);
	}

	#[test]
	fn reshuffle_continues_from_start_index() {
		let a = vec![op("a4", 4, 0, 1), op("a5", 5, 0, 4), op("a6", 6, 0, 5)];
		let b = vec![op("b4", 4, 0, 2), op("b5", 5, 0, 3)];

		let result = reshuffle_by_timestamp(OperationIndex::new(6, 2), a, b);

		assert_eq!(
			result.iter().map(|op| op.id).collect::<Vec<_>>(),
			vec!["a4", "b4", "b5", "a5", "a6"]
		);
		assert_eq!(
			positions(&result),
			vec![(6, 2), (7, 0), (8, 0), (9, 0), (10, 0)]
		);
	}

	#[test]
	fn reshuffle_has_no_gaps_or_duplicates() {
		let a = (0..7).map(|i| op("a", i, 0, (i as i64) * 3)).collect::<Vec<_>>();
		let b = (0..5).map(|i| op("b", i, 0, (i as i64) * 5)).collect::<Vec<_>>();

		let result = reshuffle_by_timestamp(OperationIndex::new(10, 4), a, b);

		assert_eq!(
			result.iter().map(|op| op.index).collect::<Vec<_>>(),
			(10..22).collect::<Vec<_>>()
		);
		assert_eq!(result[0].skip, 4);
		assert!(result.iter().skip(1).all(|op| op.skip == 0));
	}

	#[test]
	fn reshuffle_ties_do_not_depend_on_argument_order() {
		let a = vec![op("x", 0, 0, 7)];
		let b = vec![op("w", 0, 0, 7)];

		let left = reshuffle_by_timestamp(OperationIndex::new(0, 0), a.clone(), b.clone());
		let right = reshuffle_by_timestamp(OperationIndex::new(0, 0), b, a);

		assert_eq!(left, right);
		assert_eq!(left[0].id, "w");
	}

	#[test]
	fn reshuffle_by_timestamp_and_index_breaks_ties_by_index() {
		let a = vec![op("z", 3, 0, 100), op("y", 4, 0, 100)];
		let b = vec![op("a", 5, 0, 100), op("b", 2, 0, 50)];

		let result = reshuffle_by_timestamp_and_index(OperationIndex::new(2, 1), a, b);

		assert_eq!(
			result.iter().map(|op| op.id).collect::<Vec<_>>(),
			vec!["b", "z", "y", "a"]
		);
		assert_eq!(positions(&result), vec![(2, 1), (3, 0), (4, 0), (5, 0)]);
	}

	#[test]
	fn reshuffle_of_nothing_is_empty() {
		let result = reshuffle_by_timestamp::<Op>(OperationIndex::new(3, 1), vec![], vec![]);
		assert!(result.is_empty());
	}
}
