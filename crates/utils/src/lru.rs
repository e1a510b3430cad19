use std::{collections::HashMap, hash::Hash};

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K> {
	key: K,
	prev: usize,
	next: usize,
}

/// Least recently used ordering of keys.
///
/// Nodes live in an arena addressed by position, with a free list for reuse, and are linked in a
/// doubly linked list from most (head) to least (tail) recently used. A hash index maps every key
/// to its node, so `touch`, `evict` and `remove` are O(1). The tracker knows nothing about cached
/// values, callers evict their own entries using the keys it returns.
#[derive(Debug)]
pub struct LruTracker<K> {
	nodes: Vec<Node<K>>,
	free: Vec<usize>,
	index: HashMap<K, usize>,
	head: usize,
	tail: usize,
}

impl<K: Hash + Eq + Clone> Default for LruTracker<K> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: Hash + Eq + Clone> LruTracker<K> {
	#[must_use]
	pub fn new() -> Self {
		Self {
			nodes: Vec::new(),
			free: Vec::new(),
			index: HashMap::new(),
			head: NIL,
			tail: NIL,
		}
	}

	#[must_use]
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			nodes: Vec::with_capacity(capacity),
			free: Vec::new(),
			index: HashMap::with_capacity(capacity),
			head: NIL,
			tail: NIL,
		}
	}

	/// Marks `key` as the most recently used, inserting it if unknown.
	pub fn touch(&mut self, key: &K) {
		if let Some(&slot) = self.index.get(key) {
			if slot != self.head {
				self.unlink(slot);
				self.push_front(slot);
			}
			return;
		}

		let node = Node {
			key: key.clone(),
			prev: NIL,
			next: NIL,
		};

		let slot = if let Some(slot) = self.free.pop() {
			self.nodes[slot] = node;
			slot
		} else {
			self.nodes.push(node);
			self.nodes.len() - 1
		};

		self.index.insert(key.clone(), slot);
		self.push_front(slot);
	}

	/// Removes and returns the least recently used key.
	pub fn evict(&mut self) -> Option<K> {
		if self.tail == NIL {
			return None;
		}

		let slot = self.tail;
		self.release(slot)
	}

	/// Removes `key` wherever it is, returning whether it was tracked.
	pub fn remove(&mut self, key: &K) -> bool {
		self.index
			.get(key)
			.copied()
			.and_then(|slot| self.release(slot))
			.is_some()
	}

	/// Least recently used key, without evicting it.
	#[must_use]
	pub fn peek_lru(&self) -> Option<&K> {
		(self.tail != NIL).then(|| &self.nodes[self.tail].key)
	}

	#[must_use]
	pub fn contains(&self, key: &K) -> bool {
		self.index.contains_key(key)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.index.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.index.is_empty()
	}

	pub fn clear(&mut self) {
		self.nodes.clear();
		self.free.clear();
		self.index.clear();
		self.head = NIL;
		self.tail = NIL;
	}

	fn release(&mut self, slot: usize) -> Option<K> {
		self.unlink(slot);
		let key = self.nodes[slot].key.clone();
		self.index.remove(&key)?;
		self.free.push(slot);
		Some(key)
	}

	fn push_front(&mut self, slot: usize) {
		self.nodes[slot].prev = NIL;
		self.nodes[slot].next = self.head;

		if self.head == NIL {
			self.tail = slot;
		} else {
			self.nodes[self.head].prev = slot;
		}

		self.head = slot;
	}

	fn unlink(&mut self, slot: usize) {
		let Node { prev, next, .. } = self.nodes[slot];

		if prev == NIL {
			self.head = next;
		} else {
			self.nodes[prev].next = next;
		}

		if next == NIL {
			self.tail = prev;
		} else {
			self.nodes[next].prev = prev;
		}

		self.nodes[slot].prev = NIL;
		self.nodes[slot].next = NIL;
	}
}
