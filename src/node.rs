//! Tree nodes and the slot arena that owns them.
//!
//! Nodes never hold pointers to each other. Every link is a [`NodeId`], an
//! index into the owning tree's [`Arena`], a [`Slab`] of nodes. Released
//! slots are handed out again by the next allocation, most recently released
//! first, so a tree under churn settles into a fixed set of slots. Indices
//! are 32 bits wide, which caps a tree at `u32::MAX` nodes.
//!
//! Releasing a slot moves the whole node out of it. Child links, key and
//! value all leave together; a reused slot never exposes anything left behind
//! by its previous occupant.

use crate::pool::NodePool;
use slab::Slab;
use std::cmp::Ordering;
use std::mem;
use std::ops::{Index, IndexMut};

/// Index of a node within its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
	fn new(index: usize) -> Self {
		match u32::try_from(index) {
			Ok(index) => NodeId(index),
			Err(_) => panic!("tree cannot hold more than {} nodes", u32::MAX),
		}
	}

	#[inline]
	fn index(self) -> usize {
		self.0 as usize
	}
}

/// Selects the left or right link of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
	Left = 0,
	Right = 1,
}

impl Side {
	#[inline]
	pub(crate) fn other(self) -> Side {
		match self {
			Side::Left => Side::Right,
			Side::Right => Side::Left,
		}
	}

	/// The side to descend into from a node whose key compares `ord` against
	/// the key being searched for.
	#[inline]
	pub(crate) fn toward(ord: Ordering) -> Side {
		if ord == Ordering::Less {
			Side::Right
		} else {
			Side::Left
		}
	}

	/// Balance factor change caused by growing this side by one level.
	#[inline]
	pub(crate) fn balance(self) -> i8 {
		match self {
			Side::Left => -1,
			Side::Right => 1,
		}
	}
}

pub(crate) struct Node<K, V> {
	pub(crate) link: [Option<NodeId>; 2],
	/// Right subtree height minus left subtree height.
	pub(crate) balance: i8,
	pub(crate) key: K,
	pub(crate) value: V,
}

impl<K, V> Node<K, V> {
	fn new(key: K, value: V) -> Self {
		Node {
			link: [None, None],
			balance: 0,
			key,
			value,
		}
	}

	#[inline]
	pub(crate) fn child(&self, side: Side) -> Option<NodeId> {
		self.link[side as usize]
	}

	#[inline]
	pub(crate) fn set_child(&mut self, side: Side, child: Option<NodeId>) {
		self.link[side as usize] = child;
	}
}

/// Slot storage for the nodes of one tree.
pub(crate) struct Arena<K, V> {
	nodes: Slab<Node<K, V>>,
	pool: Option<NodePool<K, V>>,
}

impl<K, V> Arena<K, V> {
	pub(crate) fn new(pool: Option<NodePool<K, V>>) -> Self {
		Arena {
			nodes: Slab::new(),
			pool,
		}
	}

	/// Number of occupied slots.
	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Number of slots the arena can hold without growing.
	#[cfg(test)]
	pub(crate) fn capacity(&self) -> usize {
		self.nodes.capacity()
	}

	/// Places a new leaf node holding `key` and `value`.
	///
	/// # Panics
	///
	/// Panics if the arena already holds `u32::MAX` nodes.
	pub(crate) fn alloc(&mut self, key: K, value: V) -> NodeId {
		if self.nodes.capacity() == 0 {
			if let Some(pool) = &self.pool {
				self.nodes = pool.take();
			}
		}

		let entry = self.nodes.vacant_entry();
		let id = NodeId::new(entry.key());
		entry.insert(Node::new(key, value));
		id
	}

	/// Vacates a slot and hands back the association it held.
	pub(crate) fn release(&mut self, id: NodeId) -> (K, V) {
		match self.nodes.try_remove(id.index()) {
			Some(node) => (node.key, node.value),
			None => unreachable!("released vacant slot {id:?}"),
		}
	}

	/// Exchanges the associations held by two distinct nodes, leaving their
	/// links and balance factors in place.
	pub(crate) fn swap_payload(&mut self, a: NodeId, b: NodeId) {
		debug_assert_ne!(a, b);
		match self.nodes.get2_mut(a.index(), b.index()) {
			Some((x, y)) => {
				mem::swap(&mut x.key, &mut y.key);
				mem::swap(&mut x.value, &mut y.value);
			}
			None => unreachable!("payload swap between {a:?} and {b:?} touched a vacant slot"),
		}
	}

	/// Forgets every slot. Must only be called once no node is reachable.
	///
	/// The slot buffer goes back to the pool when there is one.
	pub(crate) fn reset(&mut self) {
		let nodes = mem::take(&mut self.nodes);
		if let Some(pool) = &self.pool {
			pool.put(nodes);
		}
	}
}

impl<K, V> Drop for Arena<K, V> {
	fn drop(&mut self) {
		if let Some(pool) = &self.pool {
			pool.put(mem::take(&mut self.nodes));
		}
	}
}

impl<K, V> Index<NodeId> for Arena<K, V> {
	type Output = Node<K, V>;

	#[inline]
	fn index(&self, id: NodeId) -> &Node<K, V> {
		match self.nodes.get(id.index()) {
			Some(node) => node,
			None => unreachable!("dangling node id {id:?}"),
		}
	}
}

impl<K, V> IndexMut<NodeId> for Arena<K, V> {
	#[inline]
	fn index_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
		match self.nodes.get_mut(id.index()) {
			Some(node) => node,
			None => unreachable!("dangling node id {id:?}"),
		}
	}
}
