//! # avltree: An AVL Tree with Live Cursors
//!
//! This crate provides an ordered map built on a height-balanced binary search
//! tree, together with cursors that stay valid while the tree is being
//! modified. A cursor can be opened, the tree changed by any number of
//! insertions and removals, and the cursor then picks up exactly where the new
//! shape of the tree says it should.
//!
//! ## Design Overview
//!
//! ### Key Concepts
//!
//! **Balance Factors**: Every node stores the height of its right subtree minus
//! the height of its left subtree, which is always -1, 0 or +1 between
//! operations. Insertions and removals retrace the path they took and restore
//! the bound with single or double rotations, so the height of a tree with `n`
//! associations stays below `1.44 * log2(n + 2)`.
//!
//! **Index Links**: Nodes live in a slot arena owned by the tree and link to
//! each other by index. There are no parent pointers. Anything that needs to
//! climb back up (retracing after a mutation, advancing a cursor) carries the
//! stack of ancestors it came through, bounded by [`MAX_TREE_HEIGHT`].
//!
//! **Live Cursors**: The tree keeps a registry of every open [`Cursor`]. A
//! mutation that reshapes the tree marks them dirty and each one rebuilds its
//! ancestor stack lazily, on its next step. Removing the node a cursor is
//! parked on moves that cursor forward immediately. See [`cursor`] for the
//! details.
//!
//! **Node Pools**: Trees may share a [`NodePool`], which keeps the slot buffers
//! of cleared and dropped trees for reuse. The pool is the only part of the
//! crate that may be shared between threads.
//!
//! ### Tree Structure
//!
//! ```text
//!    Tree ──► Rc<Inner> ◄─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┐ (weak)
//!                   │                                │
//!          ┌────────┴─────────┐                  ┌───┴────┐
//!          ▼ RefCell          ▼ RefCell          │ Cursor │
//!    ┌───────────┐     ┌─────────────┐           └───┬────┘
//!    │   Arena   │     │  registry   │               │ handle
//!    │ Slab<Node>│     │ List<Path>  │◄──────────────┘
//!    └─────┬─────┘     └─────────────┘
//!          │ buffers on clear/drop
//!          ▼
//!    ┌───────────┐
//!    │ NodePool  │  <- Arc<Mutex<..>>, shared between trees and threads
//!    └───────────┘
//! ```
//!
//! ## Basic Usage
//!
//! ```
//! use avltree::Tree;
//!
//! let mut tree = Tree::new();
//!
//! tree.add(3, "three");
//! tree.add(1, "one");
//! tree.add(2, "two");
//!
//! assert_eq!(tree.find(&2), Some("two"));
//! assert_eq!(tree.find_equal_or_greater(&4), None);
//! assert_eq!(tree.find_lowest(), Some((1, "one")));
//!
//! let mut cursor = tree.cursor();
//! assert_eq!(cursor.next(), Some((1, "one")));
//! tree.remove(&2);
//! assert_eq!(cursor.next(), Some((3, "three")));
//! assert_eq!(cursor.next(), None);
//! ```
//!
//! ## Thread Safety
//!
//! A [`Tree`] and its cursors belong to one thread; neither is `Send`. Callers
//! that need a tree on several threads wrap it in their own synchronisation.
//! [`NodePool`] handles are `Send + Sync` and can be cloned into trees living
//! on different threads.

use smallvec::SmallVec;

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::rc::Rc;

pub mod cursor;
pub mod error;
pub mod list;
mod node;
pub mod pool;
mod sync;

pub use cursor::{Cursor, Direction};
pub use error::Error;
pub use pool::NodePool;

use cursor::Path;
use list::{Handle, List};
use node::{Arena, NodeId, Side};

// ---------------------------------------------------------------------------
// Configuration Constants
// ---------------------------------------------------------------------------

/// Height the inline traversal stacks are sized for.
///
/// An AVL tree this tall holds more associations than fit in memory, so the
/// bound is never reached in practice. Should it be exceeded, the stacks spill
/// to the heap instead of failing.
pub const MAX_TREE_HEIGHT: usize = 48;

type SearchPath = SmallVec<[(NodeId, Side); MAX_TREE_HEIGHT]>;

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// A total order over keys.
///
/// Implemented by [`Natural`] for any `K: Ord`, and by every closure of the
/// shape `Fn(&K, &K) -> Ordering`:
///
/// ```
/// use avltree::Tree;
///
/// let mut tree = Tree::with_comparator(|a: &i32, b: &i32| b.cmp(a));
/// tree.extend([(1, ()), (2, ()), (3, ())]);
/// assert_eq!(tree.find_lowest(), Some((3, ())));
/// ```
///
/// The order must stay the same for as long as a key is in the tree.
pub trait Comparator<K> {
	/// Compares `lhs` against `rhs`.
	fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Natural;

impl<K: Ord> Comparator<K> for Natural {
	#[inline]
	fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
		lhs.cmp(rhs)
	}
}

impl<K, F> Comparator<K> for F
where
	F: Fn(&K, &K) -> Ordering,
{
	#[inline]
	fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
		self(lhs, rhs)
	}
}

// ---------------------------------------------------------------------------
// Construction Options
// ---------------------------------------------------------------------------

/// Settings applied when a tree is created.
pub struct Options<K, V> {
	pool: Option<NodePool<K, V>>,
}

impl<K, V> Options<K, V> {
	/// Options for a tree that allocates on its own.
	pub fn new() -> Self {
		Options {
			pool: None,
		}
	}

	/// Draws node storage from `pool` and returns it there on clear and drop.
	pub fn with_pool(mut self, pool: NodePool<K, V>) -> Self {
		self.pool = Some(pool);
		self
	}
}

impl<K, V> Default for Options<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V> Clone for Options<K, V> {
	fn clone(&self) -> Self {
		Options {
			pool: self.pool.clone(),
		}
	}
}

impl<K, V> fmt::Debug for Options<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Options").field("pool", &self.pool).finish()
	}
}

/// Outcome of [`Tree::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
	/// No node has subtrees whose heights differ by more than one.
	pub balanced: bool,
	/// Every left child orders before its parent and every right child after.
	pub sorted: bool,
}

impl Validation {
	/// Both properties hold.
	pub fn is_valid(&self) -> bool {
		self.balanced && self.sorted
	}
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// An ordered map from `K` to `V`, kept balanced as an AVL tree.
///
/// Keys are ordered by the comparator `C`, [`Natural`] by default. Each key is
/// present at most once; adding an existing key replaces its association.
pub struct Tree<K, V, C = Natural> {
	inner: Rc<Inner<K, V, C>>,
}

/// Shared state of a tree and its cursors.
///
/// The nodes and the cursor registry are borrowed separately, so cursors can
/// open, close and advance while a read of the nodes is in progress.
pub(crate) struct Inner<K, V, C> {
	pub(crate) core: RefCell<Core<K, V, C>>,
	/// Every open cursor on this tree.
	cursors: RefCell<List<Path>>,
	/// Cursors closed while `cursors` was borrowed. Removed on its next borrow.
	closing: Cell<Vec<Handle>>,
}

/// The balanced tree proper.
pub(crate) struct Core<K, V, C> {
	pub(crate) root: Option<NodeId>,
	pub(crate) len: usize,
	pub(crate) arena: Arena<K, V>,
	pub(crate) compare: C,
}

/// Nodes involved in unlinking an association.
#[derive(Debug, Clone, Copy)]
struct Removal {
	/// Node that held the removed association when the removal started.
	origin: NodeId,
	/// Node taken out of the tree; it holds the removed association now.
	/// Differs from `origin` when the association was exchanged with its
	/// in-order successor.
	released: NodeId,
}

impl<K: Ord, V> Tree<K, V> {
	/// Creates an empty tree ordered by `K`'s [`Ord`] implementation.
	///
	/// # Example
	///
	/// ```
	/// use avltree::Tree;
	///
	/// let tree: Tree<String, u64> = Tree::new();
	/// assert!(tree.is_empty());
	/// ```
	pub fn new() -> Self {
		Self::with_comparator(Natural)
	}
}

impl<K, V, C: Comparator<K>> Tree<K, V, C> {
	/// Creates an empty tree ordered by `compare`.
	pub fn with_comparator(compare: C) -> Self {
		Self::with_options(compare, Options::new())
	}

	/// Creates an empty tree ordered by `compare` and configured by `options`.
	///
	/// # Example
	///
	/// ```
	/// use avltree::{Natural, NodePool, Options, Tree};
	///
	/// let pool = NodePool::new();
	/// let mut tree = Tree::with_options(Natural, Options::new().with_pool(pool.clone()));
	/// tree.add("a", 1);
	/// tree.clear();
	/// assert_eq!(pool.idle(), 1);
	/// ```
	pub fn with_options(compare: C, options: Options<K, V>) -> Self {
		Tree {
			inner: Rc::new(Inner {
				core: RefCell::new(Core {
					root: None,
					len: 0,
					arena: Arena::new(options.pool),
					compare,
				}),
				cursors: RefCell::new(List::new()),
				closing: Cell::new(Vec::new()),
			}),
		}
	}

	fn core(&self) -> Ref<'_, Core<K, V, C>> {
		self.inner.core.borrow()
	}

	// -----------------------------------------------------------------------
	// Size
	// -----------------------------------------------------------------------

	/// Returns the number of associations in the tree.
	pub fn len(&self) -> usize {
		self.core().len
	}

	/// Returns `true` if the tree holds no associations.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the number of levels in the tree, 0 when empty.
	///
	/// Follows the taller side of each node, so this costs O(log n).
	pub fn height(&self) -> usize {
		self.core().height()
	}

	/// Returns the number of cursors currently registered with the tree.
	pub fn open_cursors(&self) -> usize {
		self.inner.registry().len()
	}

	// -----------------------------------------------------------------------
	// Mutation
	// -----------------------------------------------------------------------

	/// Associates `value` with `key`.
	///
	/// If `key` was already present both the stored key and value are
	/// replaced and the old value is returned. Replacing an association does
	/// not change the shape of the tree and leaves open cursors alone.
	///
	/// # Example
	///
	/// ```
	/// use avltree::Tree;
	///
	/// let mut tree = Tree::new();
	/// assert_eq!(tree.add(1, "one"), None);
	/// assert_eq!(tree.add(1, "uno"), Some("one"));
	/// assert_eq!(tree.len(), 1);
	/// ```
	pub fn add(&mut self, key: K, value: V) -> Option<V> {
		self.inner.add(key, value).map(|(_, v)| v)
	}

	/// Removes `key` and returns the value it was associated with.
	///
	/// Removing an absent key changes nothing.
	pub fn remove(&mut self, key: &K) -> Option<V> {
		self.remove_entry(key).map(|(_, v)| v)
	}

	/// Removes `key` and returns the stored key together with its value.
	pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
		self.inner.remove(key)
	}

	/// Removes every association and closes every open cursor.
	pub fn clear(&mut self) {
		self.clear_with(|_, _| {});
	}

	/// Removes every association, handing each one to `release` in ascending
	/// order, and closes every open cursor.
	///
	/// `release` runs while the tree is being torn down. Reading the tree or
	/// advancing one of its cursors from inside it panics; dropping a cursor
	/// is fine.
	///
	/// # Example
	///
	/// ```
	/// use avltree::Tree;
	///
	/// let mut tree: Tree<i32, String> = (1..=3).map(|i| (i, i.to_string())).collect();
	/// let mut released = Vec::new();
	/// tree.clear_with(|k, v| released.push((k, v)));
	/// assert_eq!(released.len(), 3);
	/// assert_eq!(released[0], (1, "1".to_string()));
	/// assert!(tree.is_empty());
	/// ```
	pub fn clear_with<F>(&mut self, release: F)
	where
		F: FnMut(K, V),
	{
		self.inner.clear(release);
	}

	// -----------------------------------------------------------------------
	// Lookup
	// -----------------------------------------------------------------------

	/// Looks up `key` and passes its value to `f`.
	///
	/// # Example
	///
	/// ```
	/// use avltree::Tree;
	///
	/// let mut tree = Tree::new();
	/// tree.add("key", vec![1, 2, 3]);
	///
	/// assert_eq!(tree.lookup(&"key", |v| v.len()), Some(3));
	/// assert_eq!(tree.lookup(&"other", |v| v.len()), None);
	/// ```
	pub fn lookup<R, F>(&self, key: &K, f: F) -> Option<R>
	where
		F: FnOnce(&V) -> R,
	{
		let core = self.core();
		core.find(key).map(|node| f(&core.arena[node].value))
	}

	/// Returns a clone of the value associated with `key`.
	pub fn find(&self, key: &K) -> Option<V>
	where
		V: Clone,
	{
		self.lookup(key, V::clone)
	}

	/// Returns `true` if the tree contains `key`.
	pub fn contains_key(&self, key: &K) -> bool {
		self.core().find(key).is_some()
	}

	/// Passes the association with the greatest key not above `key` to `f`.
	pub fn lookup_equal_or_lesser<R, F>(&self, key: &K, f: F) -> Option<R>
	where
		F: FnOnce(&K, &V) -> R,
	{
		let core = self.core();
		core.find_nearest(key, Side::Left).map(|node| core.visit(node, f))
	}

	/// Passes the association with the least key not below `key` to `f`.
	pub fn lookup_equal_or_greater<R, F>(&self, key: &K, f: F) -> Option<R>
	where
		F: FnOnce(&K, &V) -> R,
	{
		let core = self.core();
		core.find_nearest(key, Side::Right).map(|node| core.visit(node, f))
	}

	/// Returns the association with the greatest key not above `key`.
	///
	/// # Example
	///
	/// ```
	/// use avltree::Tree;
	///
	/// let tree: Tree<i32, ()> = [2, 5, 6, 7, 10].into_iter().map(|k| (k, ())).collect();
	/// assert_eq!(tree.find_equal_or_lesser(&9), Some((7, ())));
	/// assert_eq!(tree.find_equal_or_lesser(&5), Some((5, ())));
	/// assert_eq!(tree.find_equal_or_lesser(&1), None);
	/// ```
	pub fn find_equal_or_lesser(&self, key: &K) -> Option<(K, V)>
	where
		K: Clone,
		V: Clone,
	{
		self.lookup_equal_or_lesser(key, |k, v| (k.clone(), v.clone()))
	}

	/// Returns the association with the least key not below `key`.
	pub fn find_equal_or_greater(&self, key: &K) -> Option<(K, V)>
	where
		K: Clone,
		V: Clone,
	{
		self.lookup_equal_or_greater(key, |k, v| (k.clone(), v.clone()))
	}

	/// Passes the association with the lowest key to `f`.
	pub fn first_key_value<R, F>(&self, f: F) -> Option<R>
	where
		F: FnOnce(&K, &V) -> R,
	{
		let core = self.core();
		core.edge(Side::Left).map(|node| core.visit(node, f))
	}

	/// Passes the association with the highest key to `f`.
	pub fn last_key_value<R, F>(&self, f: F) -> Option<R>
	where
		F: FnOnce(&K, &V) -> R,
	{
		let core = self.core();
		core.edge(Side::Right).map(|node| core.visit(node, f))
	}

	/// Returns the association with the lowest key.
	pub fn find_lowest(&self) -> Option<(K, V)>
	where
		K: Clone,
		V: Clone,
	{
		self.first_key_value(|k, v| (k.clone(), v.clone()))
	}

	/// Returns the association with the highest key.
	pub fn find_highest(&self) -> Option<(K, V)>
	where
		K: Clone,
		V: Clone,
	{
		self.last_key_value(|k, v| (k.clone(), v.clone()))
	}

	// -----------------------------------------------------------------------
	// Traversal
	// -----------------------------------------------------------------------

	/// Calls `f` on every association in ascending key order.
	///
	/// The walk does not register a cursor, so it costs no bookkeeping on the
	/// tree. `f` may read the tree and open, advance or drop its cursors, but
	/// modifying the tree from inside `f` panics.
	pub fn apply<F>(&self, mut f: F)
	where
		F: FnMut(&K, &V),
	{
		let guard = self.core();
		let core = &*guard;
		let mut path = Path::new(Direction::Forward);
		if !path.seek_start(core) {
			return;
		}
		while let Some(node) = path.current() {
			let node = &core.arena[node];
			f(&node.key, &node.value);
			path.advance(core);
		}
	}

	/// Opens a cursor that visits associations in ascending key order.
	///
	/// # Panics
	///
	/// Panics if called from a [`clear_with`](Tree::clear_with) callback
	/// running on this tree.
	pub fn cursor(&self) -> Cursor<K, V, C> {
		Cursor::open(&self.inner, Direction::Forward)
	}

	/// Opens a cursor that visits associations in descending key order.
	///
	/// # Panics
	///
	/// Panics if called from a [`clear_with`](Tree::clear_with) callback
	/// running on this tree.
	pub fn reverse_cursor(&self) -> Cursor<K, V, C> {
		Cursor::open(&self.inner, Direction::Reverse)
	}

	// -----------------------------------------------------------------------
	// Validation
	// -----------------------------------------------------------------------

	/// Reports whether the tree is balanced and sorted.
	///
	/// Ordering is checked between each node and its children only.
	pub fn validate(&self) -> Validation {
		self.core().validate()
	}

	/// Walks the whole tree and reports the first broken invariant.
	///
	/// Checks, per node: subtree heights differ by at most one, the stored
	/// balance factor matches them, and the key lies strictly between the
	/// keys of the ancestors it hangs under. For the tree as a whole: the
	/// association count matches the reachable nodes and the height stays
	/// within [`MAX_TREE_HEIGHT`].
	pub fn check_invariants(&self) -> error::Result<()> {
		self.core().check()
	}
}

// ---------------------------------------------------------------------------
// Mutation with cursor bookkeeping
// ---------------------------------------------------------------------------

impl<K, V, C> Inner<K, V, C> {
	/// Borrows the cursor registry, first dropping cursors whose close had to
	/// be deferred.
	///
	/// # Panics
	///
	/// Panics if the registry is already borrowed.
	pub(crate) fn registry(&self) -> RefMut<'_, List<Path>> {
		let mut cursors = self.cursors.borrow_mut();
		for handle in self.closing.take() {
			cursors.remove(handle);
		}
		cursors
	}

	/// Deregisters a cursor. Never panics: while the registry is borrowed
	/// the handle is queued and dropped on the registry's next borrow.
	pub(crate) fn forget_cursor(&self, handle: Handle) {
		match self.cursors.try_borrow_mut() {
			Ok(mut cursors) => {
				cursors.remove(handle);
			}
			Err(_) => {
				let mut closing = self.closing.take();
				closing.push(handle);
				self.closing.set(closing);
			}
		}
	}

	/// Reports whether the registry still holds `handle`, or `None` while the
	/// registry is borrowed and cannot be looked at.
	pub(crate) fn is_registered(&self, handle: Handle) -> Option<bool> {
		let cursors = self.cursors.try_borrow().ok()?;
		let closing = self.closing.take();
		let registered = cursors.contains(handle) && !closing.contains(&handle);
		self.closing.set(closing);
		Some(registered)
	}
}

impl<K, V, C: Comparator<K>> Inner<K, V, C> {
	fn add(&self, key: K, value: V) -> Option<(K, V)> {
		let previous = self.core.borrow_mut().insert(key, value);
		if previous.is_none() {
			mark_cursors_dirty(&mut *self.registry());
		}
		previous
	}

	fn remove(&self, key: &K) -> Option<(K, V)> {
		let mut core = self.core.borrow_mut();
		let removal = core.unlink(key)?;
		fix_cursors(&*core, &mut *self.registry(), removal);
		Some(core.arena.release(removal.released))
	}

	fn clear<F>(&self, mut release: F)
	where
		F: FnMut(K, V),
	{
		let mut core = self.core.borrow_mut();
		let mut released = 0usize;

		// Rotate left children up until the node in hand has none, then
		// release it and carry on with its right child. Visits in order
		// without a stack.
		let mut at = core.root.take();
		while let Some(node) = at {
			match core.arena[node].child(Side::Left) {
				None => {
					at = core.arena[node].child(Side::Right);
					let (key, value) = core.arena.release(node);
					release(key, value);
					released += 1;
				}
				Some(save) => {
					let inner = core.arena[save].child(Side::Right);
					core.arena[node].set_child(Side::Left, inner);
					core.arena[save].set_child(Side::Right, Some(node));
					at = Some(save);
				}
			}
		}

		core.len = 0;
		core.arena.reset();
		drop(core);

		let mut cursors = self.registry();
		let closed = cursors.len();
		cursors.clear();
		tracing::debug!(released, closed, "cleared tree");
	}
}

fn mark_cursors_dirty(cursors: &mut List<Path>) {
	let head = cursors.head();
	let mut at = cursors.next(head);
	while let Some(handle) = at {
		if handle == head {
			break;
		}
		at = cursors.next(handle);
		if let Some(path) = cursors.get_mut(handle) {
			path.dirty = true;
		}
	}
}

/// Repairs open cursors after `removal` was unlinked but before its node is
/// released.
fn fix_cursors<K, V, C: Comparator<K>>(
	core: &Core<K, V, C>,
	cursors: &mut List<Path>,
	removal: Removal,
) {
	let removed_key = &core.arena[removal.released].key;

	let head = cursors.head();
	let mut at = cursors.next(head);
	while let Some(handle) = at {
		if handle == head {
			break;
		}
		at = cursors.next(handle);
		let Some(path) = cursors.get_mut(handle) else {
			continue;
		};

		path.dirty = true;
		match path.current() {
			Some(curr) if curr == removal.origin => {
				// Parked on the removed association: move on now, while its
				// key is still around to search by.
				path.dirty = false;
				if !path.seek_after(core, removed_key) {
					tracing::trace!("closing cursor parked on the last association");
					cursors.remove(handle);
				}
			}
			Some(curr) if curr == removal.released => {
				// Parked on the successor, whose association moved into the
				// origin node.
				path.relocate(removal.origin);
			}
			_ => {}
		}
	}
}

// ---------------------------------------------------------------------------
// Balancing
// ---------------------------------------------------------------------------

impl<K, V, C> Core<K, V, C> {
	/// The `side` child of `node`, which the caller knows to exist.
	#[inline]
	fn child(&self, node: NodeId, side: Side) -> NodeId {
		match self.arena[node].child(side) {
			Some(child) => child,
			None => unreachable!("node {node:?} has no {side:?} child"),
		}
	}

	fn set_subtree(&mut self, parent: Option<&(NodeId, Side)>, subtree: Option<NodeId>) {
		match parent {
			Some(&(node, side)) => self.arena[node].set_child(side, subtree),
			None => self.root = subtree,
		}
	}

	/// Rotates the subtree at `root` toward `side` and returns its new root.
	fn single_rotation(&mut self, root: NodeId, side: Side) -> NodeId {
		let other = side.other();
		let save = self.child(root, other);
		let inner = self.arena[save].child(side);
		self.arena[root].set_child(other, inner);
		self.arena[save].set_child(side, Some(root));
		save
	}

	fn double_rotation(&mut self, root: NodeId, side: Side) -> NodeId {
		let other = side.other();
		let pivot = self.child(root, other);
		let lifted = self.single_rotation(pivot, other);
		self.arena[root].set_child(other, Some(lifted));
		self.single_rotation(root, side)
	}

	/// Sets the balance factors of the three nodes taking part in a double
	/// rotation of `root` away from `side`.
	fn adjust_balance(&mut self, root: NodeId, side: Side, bal: i8) {
		let n1 = self.child(root, side);
		let n2 = self.child(n1, side.other());
		let (root_bal, n1_bal) = match self.arena[n2].balance {
			0 => (0, 0),
			b if b == bal => (-bal, 0),
			_ => (0, bal),
		};
		self.arena[root].balance = root_bal;
		self.arena[n1].balance = n1_bal;
		self.arena[n2].balance = 0;
	}

	/// Restores balance at `root` after its `side` subtree grew too tall.
	fn insert_balance(&mut self, root: NodeId, side: Side) -> NodeId {
		let n = self.child(root, side);
		let bal = side.balance();
		if self.arena[n].balance == bal {
			self.arena[root].balance = 0;
			self.arena[n].balance = 0;
			self.single_rotation(root, side.other())
		} else {
			self.adjust_balance(root, side, bal);
			self.double_rotation(root, side.other())
		}
	}

	/// Restores balance at `root` after its `side` subtree shrank. Returns the
	/// new subtree root and whether the subtree kept its height, which ends
	/// the retrace.
	fn remove_balance(&mut self, root: NodeId, side: Side) -> (NodeId, bool) {
		let n = self.child(root, side.other());
		let bal = side.balance();
		match self.arena[n].balance {
			b if b == -bal => {
				self.arena[root].balance = 0;
				self.arena[n].balance = 0;
				(self.single_rotation(root, side), false)
			}
			b if b == bal => {
				self.adjust_balance(root, side.other(), -bal);
				(self.double_rotation(root, side), false)
			}
			_ => {
				self.arena[root].balance = -bal;
				self.arena[n].balance = bal;
				(self.single_rotation(root, side), true)
			}
		}
	}

	/// Outermost node on `side`.
	fn edge(&self, side: Side) -> Option<NodeId> {
		let mut node = self.root?;
		while let Some(child) = self.arena[node].child(side) {
			node = child;
		}
		Some(node)
	}

	fn visit<R, F>(&self, node: NodeId, f: F) -> R
	where
		F: FnOnce(&K, &V) -> R,
	{
		let node = &self.arena[node];
		f(&node.key, &node.value)
	}

	fn height(&self) -> usize {
		let mut height = 0;
		let mut at = self.root;
		while let Some(node) = at {
			height += 1;
			let taller = if self.arena[node].balance < 0 {
				Side::Left
			} else {
				Side::Right
			};
			at = self.arena[node].child(taller);
		}
		height
	}
}

impl<K, V, C: Comparator<K>> Core<K, V, C> {
	fn find(&self, key: &K) -> Option<NodeId> {
		let mut at = self.root;
		while let Some(node) = at {
			match self.compare.compare(&self.arena[node].key, key) {
				Ordering::Equal => return Some(node),
				ord => at = self.arena[node].child(Side::toward(ord)),
			}
		}
		None
	}

	/// Finds `key`, or else the closest node on `side` of it.
	fn find_nearest(&self, key: &K, side: Side) -> Option<NodeId> {
		let mut best = None;
		let mut at = self.root;
		while let Some(node) = at {
			let ord = self.compare.compare(&self.arena[node].key, key);
			if ord == Ordering::Equal {
				return Some(node);
			}
			let toward = Side::toward(ord);
			if toward != side {
				best = Some(node);
			}
			at = self.arena[node].child(toward);
		}
		best
	}

	/// Inserts a new association, or replaces the existing one for the same
	/// key and returns it.
	fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
		let Some(root) = self.root else {
			self.root = Some(self.arena.alloc(key, value));
			self.len += 1;
			return None;
		};

		// The deepest node on the way down with a non-zero balance factor is
		// the only one that can end up unbalanced.
		let mut path = SearchPath::new();
		let mut pivot = 0;
		let mut node = root;
		loop {
			let ord = self.compare.compare(&self.arena[node].key, &key);
			if ord == Ordering::Equal {
				let node = &mut self.arena[node];
				let old_key = mem::replace(&mut node.key, key);
				let old_value = mem::replace(&mut node.value, value);
				return Some((old_key, old_value));
			}
			let side = Side::toward(ord);
			path.push((node, side));
			match self.arena[node].child(side) {
				Some(child) => {
					if self.arena[child].balance != 0 {
						pivot = path.len();
					}
					node = child;
				}
				None => break,
			}
		}

		let leaf = self.arena.alloc(key, value);
		let (parent, side) = path[path.len() - 1];
		self.arena[parent].set_child(side, Some(leaf));

		for &(node, side) in &path[pivot..] {
			self.arena[node].balance += side.balance();
		}

		let (top, side) = path[pivot];
		if self.arena[top].balance.abs() > 1 {
			let subtree = self.insert_balance(top, side);
			let parent = pivot.checked_sub(1).map(|i| path[i]);
			self.set_subtree(parent.as_ref(), Some(subtree));
		}

		self.len += 1;
		None
	}

	/// Takes the association for `key` out of the tree structure and
	/// rebalances. The released node still holds the association; the caller
	/// frees it.
	fn unlink(&mut self, key: &K) -> Option<Removal> {
		let mut path = SearchPath::new();
		let mut node = self.root?;
		loop {
			let ord = self.compare.compare(&self.arena[node].key, key);
			if ord == Ordering::Equal {
				break;
			}
			let side = Side::toward(ord);
			path.push((node, side));
			node = self.arena[node].child(side)?;
		}
		let origin = node;

		let left = self.arena[origin].child(Side::Left);
		let right = self.arena[origin].child(Side::Right);
		let released = match (left, right) {
			(Some(_), Some(right)) => {
				// Exchange with the in-order successor, which has no left
				// child, and splice the successor out instead.
				path.push((origin, Side::Right));
				let mut heir = right;
				while let Some(left) = self.arena[heir].child(Side::Left) {
					path.push((heir, Side::Left));
					heir = left;
				}
				self.arena.swap_payload(origin, heir);
				let orphan = self.arena[heir].child(Side::Right);
				self.set_subtree(path.last(), orphan);
				heir
			}
			(left, right) => {
				self.set_subtree(path.last(), left.or(right));
				origin
			}
		};

		while let Some((node, side)) = path.pop() {
			self.arena[node].balance -= side.balance();
			match self.arena[node].balance {
				0 => continue,
				-1 | 1 => break,
				_ => {
					let (subtree, settled) = self.remove_balance(node, side);
					self.set_subtree(path.last(), Some(subtree));
					if settled {
						break;
					}
				}
			}
		}

		self.len -= 1;
		Some(Removal {
			origin,
			released,
		})
	}

	fn validate(&self) -> Validation {
		let mut validation = Validation {
			balanced: true,
			sorted: true,
		};
		if let Some(root) = self.root {
			self.validate_node(root, &mut validation);
		}
		validation
	}

	fn validate_node(&self, node: NodeId, validation: &mut Validation) -> usize {
		let mut heights = [0; 2];
		for (side, expected) in [(Side::Left, Ordering::Less), (Side::Right, Ordering::Greater)] {
			if let Some(child) = self.arena[node].child(side) {
				if self.compare.compare(&self.arena[child].key, &self.arena[node].key) != expected {
					validation.sorted = false;
				}
				heights[side as usize] = self.validate_node(child, validation);
			}
		}
		if heights[0].abs_diff(heights[1]) > 1 {
			validation.balanced = false;
		}
		1 + heights[0].max(heights[1])
	}

	fn check(&self) -> error::Result<()> {
		let mut reachable = 0;
		let height = match self.root {
			Some(root) => self.check_node(root, 0, None, None, &mut reachable)?,
			None => 0,
		};
		if reachable != self.len {
			return Err(Error::LengthMismatch {
				reported: self.len,
				reachable,
			});
		}
		if height > MAX_TREE_HEIGHT {
			return Err(Error::TooTall {
				height,
				max: MAX_TREE_HEIGHT,
			});
		}
		Ok(())
	}

	fn check_node<'a>(
		&'a self,
		node: NodeId,
		depth: usize,
		lower: Option<&'a K>,
		upper: Option<&'a K>,
		reachable: &mut usize,
	) -> error::Result<usize> {
		let n = &self.arena[node];
		let above_lower = lower.map_or(true, |lo| self.compare.compare(lo, &n.key) == Ordering::Less);
		let below_upper = upper.map_or(true, |hi| self.compare.compare(&n.key, hi) == Ordering::Less);
		if !(above_lower && below_upper) {
			return Err(Error::Unsorted {
				depth,
			});
		}
		*reachable += 1;

		let left = match n.child(Side::Left) {
			Some(child) => self.check_node(child, depth + 1, lower, Some(&n.key), reachable)?,
			None => 0,
		};
		let right = match n.child(Side::Right) {
			Some(child) => self.check_node(child, depth + 1, Some(&n.key), upper, reachable)?,
			None => 0,
		};

		if left.abs_diff(right) > 1 {
			return Err(Error::Unbalanced {
				depth,
				left,
				right,
			});
		}
		let computed = right as isize - left as isize;
		if computed != n.balance as isize {
			return Err(Error::BalanceFactor {
				depth,
				stored: n.balance,
				computed,
			});
		}
		Ok(1 + left.max(right))
	}
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

impl<K, V, C: Comparator<K> + Default> Default for Tree<K, V, C> {
	fn default() -> Self {
		Self::with_comparator(C::default())
	}
}

impl<K: fmt::Debug, V: fmt::Debug, C: Comparator<K>> fmt::Debug for Tree<K, V, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut map = f.debug_map();
		self.apply(|k, v| {
			map.entry(k, v);
		});
		map.finish()
	}
}

impl<K, V, C: Comparator<K>> Extend<(K, V)> for Tree<K, V, C> {
	fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
		for (key, value) in iter {
			self.inner.add(key, value);
		}
	}
}

impl<K, V, C: Comparator<K> + Default> FromIterator<(K, V)> for Tree<K, V, C> {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut tree = Self::default();
		tree.extend(iter);
		tree
	}
}

// ===========================================================================
// Test-Only Validation
// ===========================================================================

#[cfg(any(test, feature = "test-utils"))]
impl<K, V, C: Comparator<K>> Tree<K, V, C> {
	/// Validates all tree invariants. Panics with the first violation found.
	///
	/// Call after operations in tests to verify the tree kept its structure.
	pub fn assert_invariants(&self) {
		if let Err(e) = self.check_invariants() {
			panic!("tree invariant violated: {e}");
		}
	}
}
