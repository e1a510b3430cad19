use std::collections::HashSet;

use super::{
	operation::{OperationIndex, OperationIndexed},
	order::Reshuffle,
};

/// Result of splitting two sorted histories at the first position where they disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<T> {
	pub common: Vec<T>,
	pub target: Vec<T>,
	pub merge: Vec<T>,
}

/// Positions of the operations that survive garbage collection.
///
/// Walking back from the end, every kept operation hides the earlier operations it skips over,
/// that is every operation with `index > op.index - op.skip - 1`.
fn retained<T: OperationIndexed>(sorted: &[T]) -> Vec<usize> {
	let mut kept = Vec::new();
	let mut remaining = sorted.len();

	while let Some(current) = remaining.checked_sub(1) {
		kept.push(current);

		let op = &sorted[current];
		let skip_until = op.index().checked_sub(op.skip().saturating_add(1));

		let mut next = current;
		while next > 0 && skip_until.map_or(true, |until| sorted[next - 1].index() > until) {
			next -= 1;
		}

		remaining = next;
	}

	kept.reverse();
	kept
}

/// Drops every operation undone by a later operation's skip, keeping the order.
///
/// `[0:0 1:0 2:0 2:1]` collects to `[0:0 2:1]`.
#[must_use]
pub fn garbage_collect<T: OperationIndexed>(sorted: Vec<T>) -> Vec<T> {
	let kept = retained(&sorted);
	let mut kept = kept.into_iter().peekable();

	sorted
		.into_iter()
		.enumerate()
		.filter_map(|(position, op)| kept.next_if_eq(&position).map(|_| op))
		.collect()
}

/// Splits two sorted histories into their common prefix and the two divergent tails.
#[must_use]
pub fn split<T: OperationIndexed>(target: Vec<T>, merge: Vec<T>) -> Split<T> {
	let mut result = Split {
		common: Vec::new(),
		target: Vec::new(),
		merge: Vec::new(),
	};

	let mut target = target.into_iter();
	let mut merge = merge.into_iter();
	let mut diverged = false;

	loop {
		match (target.next(), merge.next()) {
			(Some(t), Some(m)) => {
				if !diverged && t.same_operation(&m) {
					result.common.push(t);
				} else {
					diverged = true;
					result.target.push(t);
					result.merge.push(m);
				}
			}
			(Some(t), None) => result.target.push(t),
			(None, Some(m)) => result.merge.push(m),
			(None, None) => break,
		}
	}

	result
}

fn next_index<T: OperationIndexed>(sorted: &[T]) -> u64 {
	sorted.last().map_or(0, |op| op.index() + 1)
}

/// Combines two sorted histories of the same (document, scope, branch).
///
/// ```text
/// [0:0 1:0 2:0 A3:0 A4:0 A5:0] + [0:0 1:0 2:0 B3:0 B4:2 B5:0]
/// garbage collect  => [0:0 1:0 2:0 A3:0 A4:0 A5:0] + [0:0 1:0 B4:2 B5:0]
/// split            => [0:0 1:0] + [2:0 A3:0 A4:0 A5:0] + [B4:2 B5:0]
/// reshuffle(6:4)   => [6:4 7:0 8:0 9:0 10:0 11:0]
/// merge            => [0:0 1:0 6:4 7:0 8:0 9:0 10:0 11:0]
/// ```
///
/// Operations of the merged side whose id already appears on the target side are dropped.
#[must_use]
pub fn merge<T: OperationIndexed>(target: Vec<T>, merge: Vec<T>, reshuffle: Reshuffle) -> Vec<T> {
	let Split {
		mut common,
		target,
		merge,
	} = split(garbage_collect(target), garbage_collect(merge));

	let common_next = next_index(&common);
	let start = common_next
		.max(next_index(&target))
		.max(next_index(&merge));

	let target_ids = target.iter().map(|op| op.id().clone()).collect::<HashSet<_>>();
	let merge = merge
		.into_iter()
		.filter(|op| !target_ids.contains(op.id()))
		.collect();

	common.extend(reshuffle.apply(
		OperationIndex::new(start, start - common_next),
		target,
		merge,
	));

	common
}

/// The skip an undo appended after `sorted` would need, `None` when there is nothing to undo.
#[must_use]
pub fn next_skip_number<T: OperationIndexed>(sorted: &[T]) -> Option<u64> {
	let kept = retained(sorted);

	let last = &sorted[*kept.last()?];
	let mut next_skip = last.skip() + 1;

	if let Some(&previous) = kept.len().checked_sub(2).and_then(|at| kept.get(at)) {
		next_skip += sorted[previous].skip();
	}

	(last.index() >= next_skip).then_some(next_skip)
}
