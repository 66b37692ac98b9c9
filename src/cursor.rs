//! Cursors over the associations of a [`Tree`](crate::Tree).
//!
//! A cursor walks the tree in key order, ascending or descending, and keeps
//! working while the tree is modified underneath it. There are no parent
//! pointers in the tree, so each cursor records the ancestors of its current
//! node in a [`Path`] and uses that stack to find the in-order successor (or
//! predecessor) when it advances.
//!
//! ## Staying Correct Across Mutation
//!
//! Rotations triggered by an insertion or removal can restructure the tree
//! anywhere on the way from the root to a cursor's position. Instead of
//! repairing every open cursor on every mutation, the tree only flags them
//! dirty. A dirty cursor rebuilds its ancestor stack from the root the next
//! time it is advanced, by searching for the key it is parked on. Idle cursors
//! therefore cost nothing, and a cursor pays for at most one rebuild per batch
//! of mutations.
//!
//! The one case that cannot wait is removal of the very node a cursor is
//! parked on. The tree moves such a cursor on to the next association in its
//! own direction right away, or closes it if there is none.
//!
//! ```text
//!   cursor parked on 5           remove(5)               next() yields 7
//!
//!         3                         3                        3
//!        / \                       / \                      / \
//!       1   5  <- here            1   7  <- moved here     1   7
//!            \
//!             7
//! ```
//!
//! ## Lifecycle
//!
//! A cursor is registered with its tree while it is positioned on an
//! association. It closes (and deregisters) when it runs past the last
//! association, when [`Cursor::close`] is called or the cursor is dropped,
//! when the tree is cleared, and when the tree itself is dropped. A closed
//! cursor yields nothing, forever.

use crate::list::Handle;
use crate::node::{NodeId, Side};
use crate::{Comparator, Core, Inner, Natural, MAX_TREE_HEIGHT};
use smallvec::SmallVec;
use std::fmt;
use std::iter::FusedIterator;
use std::rc::{Rc, Weak};

/// Order in which a cursor visits associations.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Direction {
	/// From the lowest key to the highest.
	Forward,
	/// From the highest key to the lowest.
	Reverse,
}

impl Direction {
	fn side(self) -> Side {
		match self {
			Direction::Forward => Side::Right,
			Direction::Reverse => Side::Left,
		}
	}
}

/// Position of a cursor: the current node plus the stack of its ancestors.
pub(crate) struct Path {
	curr: Option<NodeId>,
	stack: SmallVec<[NodeId; MAX_TREE_HEIGHT]>,
	/// Side taken to move on, `Right` for ascending order.
	side: Side,
	/// Set when the tree changed shape since `stack` was built.
	pub(crate) dirty: bool,
}

impl Path {
	pub(crate) fn new(direction: Direction) -> Self {
		Path {
			curr: None,
			stack: SmallVec::new(),
			side: direction.side(),
			dirty: false,
		}
	}

	#[inline]
	pub(crate) fn current(&self) -> Option<NodeId> {
		self.curr
	}

	/// Moves the position from one node to another without touching the
	/// stack. Used when an association changes node during removal.
	pub(crate) fn relocate(&mut self, to: NodeId) {
		self.curr = Some(to);
	}

	/// Positions on the first association in traversal order. Returns `false`
	/// on an empty tree.
	pub(crate) fn seek_start<K, V, C>(&mut self, core: &Core<K, V, C>) -> bool {
		let inward = self.side.other();
		self.stack.clear();
		self.curr = None;

		let Some(mut node) = core.root else {
			return false;
		};
		while let Some(child) = core.arena[node].child(inward) {
			self.stack.push(node);
			node = child;
		}
		self.curr = Some(node);
		true
	}

	/// Rebuilds the ancestor stack of the current node by searching for its
	/// key from the root. Returns `false` if the node can no longer be found,
	/// which only happens when keys were changed behind the tree's back.
	pub(crate) fn seek_current<K, V, C: Comparator<K>>(&mut self, core: &Core<K, V, C>) -> bool {
		let Some(target) = self.curr else {
			return false;
		};
		let key = &core.arena[target].key;
		self.stack.clear();

		let mut at = core.root;
		while let Some(node) = at {
			if node == target {
				return true;
			}
			let side = Side::toward(core.compare.compare(&core.arena[node].key, key));
			self.stack.push(node);
			at = core.arena[node].child(side);
		}
		self.curr = None;
		false
	}

	/// Positions on the association that comes right after `key` in
	/// traversal order. `key` itself need not be in the tree. Returns `false`
	/// when nothing follows it.
	pub(crate) fn seek_after<K, V, C: Comparator<K>>(
		&mut self,
		core: &Core<K, V, C>,
		key: &K,
	) -> bool {
		let mut found = None;
		self.stack.clear();

		let mut at = core.root;
		while let Some(node) = at {
			let side = Side::toward(core.compare.compare(&core.arena[node].key, key));
			if side != self.side {
				// `node` lies ahead of `key`; deeper matches are closer to it.
				found = Some((node, self.stack.len()));
			}
			self.stack.push(node);
			at = core.arena[node].child(side);
		}

		match found {
			Some((node, depth)) => {
				self.stack.truncate(depth);
				self.curr = Some(node);
				true
			}
			None => {
				self.curr = None;
				false
			}
		}
	}

	/// Steps to the next node in traversal order. Returns `false` once the
	/// cursor has run off the edge of the tree.
	pub(crate) fn advance<K, V, C>(&mut self, core: &Core<K, V, C>) -> bool {
		let Some(curr) = self.curr else {
			return false;
		};
		let side = self.side;

		if let Some(child) = core.arena[curr].child(side) {
			// Next node is the innermost one of the subtree on our side.
			self.stack.push(curr);
			let mut node = child;
			while let Some(inner) = core.arena[node].child(side.other()) {
				self.stack.push(node);
				node = inner;
			}
			self.curr = Some(node);
		} else {
			// Climb until we arrive from the side we have not visited yet.
			let mut last = curr;
			self.curr = None;
			while let Some(parent) = self.stack.pop() {
				if core.arena[parent].child(side) != Some(last) {
					self.curr = Some(parent);
					break;
				}
				last = parent;
			}
		}

		self.curr.is_some()
	}
}

/// A live cursor over the associations of a tree.
///
/// Created by [`Tree::cursor`](crate::Tree::cursor) and
/// [`Tree::reverse_cursor`](crate::Tree::reverse_cursor). The cursor does not
/// borrow the tree, so the tree stays free to be modified while the cursor is
/// open:
///
/// ```
/// use avltree::Tree;
///
/// let mut tree: Tree<i32, i32> = [1, 3, 5, 7].into_iter().map(|k| (k, k)).collect();
/// let mut cursor = tree.cursor();
/// assert_eq!(cursor.next(), Some((1, 1)));
///
/// tree.add(4, 4);
/// tree.remove(&5);
/// assert_eq!(cursor.collect::<Vec<_>>(), vec![(3, 3), (4, 4), (7, 7)]);
/// ```
///
/// A cursor never keeps its tree alive. Once the tree is dropped the cursor
/// behaves as closed.
pub struct Cursor<K, V, C = Natural> {
	tree: Weak<Inner<K, V, C>>,
	handle: Option<Handle>,
	direction: Direction,
}

impl<K, V, C: Comparator<K>> Cursor<K, V, C> {
	/// Positions a new cursor on the first association in `direction` and
	/// registers it with the tree. On an empty tree the cursor starts closed.
	pub(crate) fn open(tree: &Rc<Inner<K, V, C>>, direction: Direction) -> Self {
		let core = tree.core.borrow();
		let mut path = Path::new(direction);

		let handle = if path.seek_start(&*core) {
			let mut cursors = tree.registry();
			let handle = cursors.insert(path);
			let head = cursors.head();
			cursors.link_next(head, handle);
			Some(handle)
		} else {
			None
		};

		Cursor {
			tree: Rc::downgrade(tree),
			handle,
			direction,
		}
	}

	/// Passes the current association to `f` and moves the cursor on.
	///
	/// Returns `None`, without calling `f`, once the cursor is closed.
	///
	/// # Panics
	///
	/// `f` runs while the tree is being read. It may read the tree and open,
	/// advance or drop other cursors on it, but modifying the tree from
	/// inside `f` panics.
	pub fn next_with<R, F>(&mut self, f: F) -> Option<R>
	where
		F: FnOnce(&K, &V) -> R,
	{
		let handle = self.handle?;
		let Some(tree) = self.tree.upgrade() else {
			self.detach();
			return None;
		};
		let guard = tree.core.borrow();
		let core = &*guard;

		let curr = {
			let mut cursors = tree.registry();
			let Some(path) = cursors.get_mut(handle) else {
				// Closed by the tree: cleared, or parked on a removed node.
				self.detach();
				return None;
			};

			if path.dirty {
				path.dirty = false;
				if !path.seek_current(core) {
					cursors.remove(handle);
					self.detach();
					return None;
				}
			}

			match path.current() {
				Some(curr) => curr,
				None => {
					cursors.remove(handle);
					self.detach();
					return None;
				}
			}
		};

		// The registry is not held across `f`, so other cursors stay usable.
		let node = &core.arena[curr];
		let out = f(&node.key, &node.value);

		let mut cursors = tree.registry();
		if !cursors.get_mut(handle).is_some_and(|path| path.advance(core)) {
			cursors.remove(handle);
			self.detach();
		}
		Some(out)
	}
}

impl<K, V, C> Cursor<K, V, C> {
	/// The order in which this cursor visits associations.
	pub fn direction(&self) -> Direction {
		self.direction
	}

	/// Returns `true` once the cursor can yield nothing more.
	pub fn is_closed(&self) -> bool {
		let Some(handle) = self.handle else {
			return true;
		};
		let Some(tree) = self.tree.upgrade() else {
			return true;
		};
		// While the registry is borrowed we cannot look; it was open last
		// time we checked.
		tree.is_registered(handle).is_some_and(|registered| !registered)
	}

	/// Closes the cursor and removes it from its tree. Closing a closed
	/// cursor does nothing.
	pub fn close(&mut self) {
		let Some(handle) = self.handle else {
			return;
		};
		if let Some(tree) = self.tree.upgrade() {
			tree.forget_cursor(handle);
		}
		self.detach();
	}

	fn detach(&mut self) {
		self.handle = None;
		self.tree = Weak::new();
	}
}

impl<K: Clone, V: Clone, C: Comparator<K>> Iterator for Cursor<K, V, C> {
	type Item = (K, V);

	fn next(&mut self) -> Option<(K, V)> {
		self.next_with(|k, v| (k.clone(), v.clone()))
	}
}

impl<K: Clone, V: Clone, C: Comparator<K>> FusedIterator for Cursor<K, V, C> {}

impl<K, V, C> Drop for Cursor<K, V, C> {
	fn drop(&mut self) {
		self.close();
	}
}

impl<K, V, C> fmt::Debug for Cursor<K, V, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Cursor")
			.field("direction", &self.direction)
			.field("closed", &self.is_closed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use crate::{Direction, Tree};

	fn tree_of(keys: &[i32]) -> Tree<i32, i32> {
		keys.iter().map(|&k| (k, k * 10)).collect()
	}

	#[test]
	fn forward_and_reverse_order() {
		let tree = tree_of(&[5, 1, 9, 3, 7, 11]);

		let fwd: Vec<_> = tree.cursor().map(|(k, _)| k).collect();
		assert_eq!(fwd, vec![1, 3, 5, 7, 9, 11]);

		let rev: Vec<_> = tree.reverse_cursor().map(|(k, _)| k).collect();
		assert_eq!(rev, vec![11, 9, 7, 5, 3, 1]);
	}

	#[test]
	fn empty_tree_cursor_starts_closed() {
		let tree = tree_of(&[]);
		let mut cursor = tree.cursor();
		assert!(cursor.is_closed());
		assert_eq!(cursor.next(), None);
	}

	#[test]
	fn next_with_borrows_in_place() {
		let tree = tree_of(&[2, 4]);
		let mut cursor = tree.cursor();
		assert_eq!(cursor.next_with(|k, v| k + v), Some(22));
		assert_eq!(cursor.next_with(|k, v| k + v), Some(44));
		assert_eq!(cursor.next_with(|k, v| k + v), None);
		assert!(cursor.is_closed());
	}

	#[test]
	fn running_off_the_edge_deregisters() {
		let tree = tree_of(&[1, 2, 3]);
		let mut cursor = tree.cursor();
		assert_eq!(tree.open_cursors(), 1);
		assert_eq!(cursor.by_ref().count(), 3);
		assert_eq!(tree.open_cursors(), 0);
		assert_eq!(cursor.next(), None);
	}

	#[test]
	fn close_and_drop_deregister() {
		let tree = tree_of(&[1, 2, 3]);
		let mut a = tree.cursor();
		let b = tree.reverse_cursor();
		assert_eq!(tree.open_cursors(), 2);

		a.close();
		a.close();
		assert_eq!(tree.open_cursors(), 1);
		assert_eq!(a.next(), None);

		drop(b);
		assert_eq!(tree.open_cursors(), 0);
	}

	#[test]
	fn direction_is_reported() {
		let tree = tree_of(&[1]);
		assert_eq!(tree.cursor().direction(), Direction::Forward);
		assert_eq!(tree.reverse_cursor().direction(), Direction::Reverse);
	}

	#[test]
	fn dirty_cursor_rebuilds_after_rotations() {
		let mut tree = tree_of(&[1, 2, 3]);
		let mut cursor = tree.cursor();
		assert_eq!(cursor.next().map(|(k, _)| k), Some(1));

		// Ascending inserts rotate at the root repeatedly.
		for k in 4..64 {
			tree.add(k, k * 10);
		}
		let rest: Vec<_> = cursor.map(|(k, _)| k).collect();
		assert_eq!(rest, (2..64).collect::<Vec<_>>());
	}

	#[test]
	fn removing_parked_node_moves_cursor() {
		let mut tree = tree_of(&[1, 3, 5, 7, 9, 11]);
		let mut fwd = tree.cursor();
		let mut rev = tree.reverse_cursor();
		assert_eq!(fwd.next().map(|(k, _)| k), Some(1));
		assert_eq!(rev.next().map(|(k, _)| k), Some(11));

		// fwd is parked on 3, rev on 9.
		tree.remove(&3);
		tree.remove(&9);

		assert_eq!(fwd.map(|(k, _)| k).collect::<Vec<_>>(), vec![5, 7, 11]);
		assert_eq!(rev.map(|(k, _)| k).collect::<Vec<_>>(), vec![7, 5, 1]);
	}

	#[test]
	fn cursor_outlives_tree() {
		let tree = tree_of(&[1, 2, 3]);
		let mut cursor = tree.cursor();
		drop(tree);
		assert!(cursor.is_closed());
		assert_eq!(cursor.next(), None);
	}
}
