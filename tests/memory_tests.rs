//! Memory reclamation tests for avltree.
//!
//! These tests verify that keys and values are dropped exactly once, whatever
//! path takes them out of the tree, and that pooled buffers never keep an
//! association alive.
//!
//! # Test Design
//!
//! Keys and values carry a [`Tracked`] token that counts live instances in a
//! per-test counter. Each test performs tree operations, lets the tree or pool
//! go, and checks the counter. For leaks the counters cannot see, run under
//! LeakSanitizer:
//!
//! ```bash
//! RUSTFLAGS="-Zsanitizer=leak" cargo +nightly test --test memory_tests --target x86_64-unknown-linux-gnu
//! ```

#![cfg(not(loom))]

use avltree::{Natural, NodePool, Options, Tree};
use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

// ===========================================================================
// Helper Types
// ===========================================================================

/// Counts how many instances sharing its counter are alive.
struct Tracked {
	id: i32,
	live: Rc<Cell<usize>>,
}

impl Tracked {
	fn new(id: i32, live: &Rc<Cell<usize>>) -> Self {
		live.set(live.get() + 1);
		Tracked {
			id,
			live: Rc::clone(live),
		}
	}
}

impl Drop for Tracked {
	fn drop(&mut self) {
		self.live.set(self.live.get() - 1);
	}
}

impl PartialEq for Tracked {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Tracked {}

impl PartialOrd for Tracked {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Tracked {
	fn cmp(&self, other: &Self) -> Ordering {
		self.id.cmp(&other.id)
	}
}

/// Same as [`Tracked`] with a thread-safe counter, for pooled trees.
struct SendTracked {
	id: i32,
	live: Arc<AtomicUsize>,
}

impl SendTracked {
	fn new(id: i32, live: &Arc<AtomicUsize>) -> Self {
		live.fetch_add(1, AtomicOrdering::SeqCst);
		SendTracked {
			id,
			live: Arc::clone(live),
		}
	}
}

impl Drop for SendTracked {
	fn drop(&mut self) {
		self.live.fetch_sub(1, AtomicOrdering::SeqCst);
	}
}

fn by_id(a: &SendTracked, b: &SendTracked) -> Ordering {
	a.id.cmp(&b.id)
}

// ===========================================================================
// Basic Memory Tests
// ===========================================================================

/// Every association is dropped once the tree goes.
#[test]
fn drop_releases_everything() {
	let live = Rc::new(Cell::new(0));
	{
		let mut tree = Tree::new();
		for i in 0..1000 {
			tree.add(Tracked::new(i, &live), Tracked::new(-i, &live));
		}
		assert_eq!(live.get(), 2000);
	}
	assert_eq!(live.get(), 0);
}

/// Removal hands back the association; nothing stays behind in the tree.
#[test]
fn remove_releases_association() {
	let live = Rc::new(Cell::new(0));
	let mut tree = Tree::new();
	for i in 0..100 {
		tree.add(Tracked::new(i, &live), Tracked::new(i, &live));
	}

	for i in 0..100 {
		let wanted = Tracked::new(i, &live);
		let (k, v) = tree.remove_entry(&wanted).expect("key present");
		assert_eq!((k.id, v.id), (i, i));
	}
	assert!(tree.is_empty());
	assert_eq!(live.get(), 0);
}

/// Replacing an association gives back both the old key and the old value.
#[test]
fn add_releases_replaced_association() {
	let live = Rc::new(Cell::new(0));
	let mut tree = Tree::new();

	tree.add(Tracked::new(1, &live), Tracked::new(10, &live));
	for round in 0..50 {
		let old = tree.add(Tracked::new(1, &live), Tracked::new(round, &live));
		assert!(old.is_some());
	}
	assert_eq!(tree.len(), 1);
	assert_eq!(live.get(), 2);

	drop(tree);
	assert_eq!(live.get(), 0);
}

/// Clear hands every association to the callback and keeps none.
#[test]
fn clear_releases_everything() {
	let live = Rc::new(Cell::new(0));
	let mut tree = Tree::new();
	for i in 0..500 {
		tree.add(Tracked::new(i, &live), ());
	}

	let mut seen = 0;
	tree.clear_with(|k, ()| {
		assert_eq!(k.id, seen);
		seen += 1;
	});
	assert_eq!(seen, 500);
	assert_eq!(live.get(), 0);
}

/// Slots reused after removals do not hold on to earlier occupants.
#[test]
fn churn_keeps_live_count_exact() {
	let live = Rc::new(Cell::new(0));
	let mut tree = Tree::new();

	for round in 0..20 {
		for i in 0..100 {
			tree.add(Tracked::new(i, &live), Tracked::new(round, &live));
		}
		for i in (0..100).step_by(2) {
			let wanted = Tracked::new(i, &live);
			tree.remove(&wanted);
		}
		assert_eq!(live.get(), 2 * tree.len());
	}
	tree.assert_invariants();
}

// ===========================================================================
// Cursor Lifetime Tests
// ===========================================================================

/// A cursor does not keep the tree, or its contents, alive.
#[test]
fn cursor_does_not_keep_tree_alive() {
	let live = Rc::new(Cell::new(0));
	let tree: Tree<Tracked, ()> = (0..10).map(|i| (Tracked::new(i, &live), ())).collect();
	let mut cursor = tree.cursor();
	assert!(cursor.next_with(|k, _| k.id).is_some());

	drop(tree);
	assert_eq!(live.get(), 0);
	assert!(cursor.is_closed());
	assert_eq!(cursor.next_with(|k, _| k.id), None);
}

/// Dropping open cursors deregisters them.
#[test]
fn dropped_cursors_leave_no_registrations() {
	let tree: Tree<i32, i32> = (0..10).map(|i| (i, i)).collect();
	for _ in 0..1000 {
		let mut cursor = tree.cursor();
		cursor.next();
	}
	assert_eq!(tree.open_cursors(), 0);
}

// ===========================================================================
// Pool Tests
// ===========================================================================

/// Pooled buffers are emptied before they are kept.
#[test]
fn pool_keeps_capacity_not_associations() {
	let live = Arc::new(AtomicUsize::new(0));
	let pool = NodePool::new();

	let mut tree = Tree::with_options(by_id, Options::new().with_pool(pool.clone()));
	for i in 0..256 {
		tree.add(SendTracked::new(i, &live), SendTracked::new(i, &live));
	}
	drop(tree);

	assert_eq!(live.load(AtomicOrdering::SeqCst), 0);
	assert_eq!(pool.idle(), 1);
	assert!(pool.idle_capacity() >= 256);
}

/// Clearing a pooled tree returns its buffer; the next fill takes it back.
#[test]
fn clear_cycles_buffer_through_pool() {
	let pool = NodePool::new();
	let mut tree = Tree::with_options(Natural, Options::new().with_pool(pool.clone()));

	for round in 0..5 {
		for i in 0..100 {
			tree.add(i, round);
		}
		assert_eq!(pool.idle(), 0);
		tree.clear();
		assert_eq!(pool.idle(), 1);
	}
}

/// A pool shared by several trees holds at most its limit of buffers.
#[test]
fn pool_limit_bounds_idle_buffers() {
	let pool = NodePool::with_limit(3);
	let trees: Vec<_> = (0..8)
		.map(|t| {
			let mut tree = Tree::with_options(Natural, Options::new().with_pool(pool.clone()));
			tree.add(t, t);
			tree
		})
		.collect();
	assert_eq!(pool.idle(), 0);

	drop(trees);
	assert_eq!(pool.idle(), 3);
}

/// Trees that never allocate give nothing to the pool.
#[test]
fn empty_trees_give_nothing_back() {
	let pool: NodePool<i32, i32> = NodePool::new();
	for _ in 0..4 {
		let tree = Tree::with_options(Natural, Options::new().with_pool(pool.clone()));
		assert!(tree.is_empty());
	}
	assert_eq!(pool.idle(), 0);
}
