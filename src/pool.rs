//! Node pooling shared between trees.
//!
//! A [`NodePool`] keeps the node slabs of trees that were cleared or
//! dropped, so that the next tree (or the same one, after a
//! [`clear`](crate::Tree::clear)) can start from a buffer that is already
//! sized instead of growing a fresh one node by node.
//!
//! The pool is the only piece of the crate that is shared between threads.
//! Trees themselves are single-threaded, but any number of trees on any number
//! of threads may hold clones of the same pool handle. The lock guards a short
//! push or pop and nothing else, so contention on the pool is unrelated to
//! how busy any individual tree is.
//!
//! Buffers are emptied before they are handed to the pool: every node still
//! in the buffer is dropped together with its links, key and value. A buffer
//! taken from the pool therefore carries capacity only.
//!
//! # Example
//!
//! ```
//! use avltree::{NodePool, Options, Tree};
//!
//! let pool = NodePool::new();
//!
//! let mut a = Tree::with_options(avltree::Natural, Options::new().with_pool(pool.clone()));
//! a.extend((0..1000).map(|i| (i, i)));
//! drop(a);
//! assert_eq!(pool.idle(), 1);
//!
//! // The second tree starts from the buffer the first one gave back.
//! let mut b = Tree::with_options(avltree::Natural, Options::new().with_pool(pool.clone()));
//! b.add(1, 1);
//! assert_eq!(pool.idle(), 0);
//! ```

use crate::node::Node;
use crate::sync::{Arc, Mutex};
use slab::Slab;
use std::fmt;

/// Number of idle buffers a pool keeps unless configured otherwise.
pub const DEFAULT_IDLE_LIMIT: usize = 16;

/// A cloneable handle to a pool of node buffers.
///
/// Clones share the same underlying pool.
pub struct NodePool<K, V> {
	shared: Arc<Shared<K, V>>,
}

struct Shared<K, V> {
	idle: Mutex<Vec<Slab<Node<K, V>>>>,
	limit: usize,
}

impl<K, V> NodePool<K, V> {
	/// Creates a pool that keeps up to [`DEFAULT_IDLE_LIMIT`] idle buffers.
	pub fn new() -> Self {
		Self::with_limit(DEFAULT_IDLE_LIMIT)
	}

	/// Creates a pool that keeps at most `limit` idle buffers. Buffers handed
	/// back beyond that are freed.
	pub fn with_limit(limit: usize) -> Self {
		NodePool {
			shared: Arc::new(Shared {
				idle: Mutex::new(Vec::new()),
				limit,
			}),
		}
	}

	/// Number of buffers currently waiting in the pool.
	pub fn idle(&self) -> usize {
		self.shared.idle.lock().len()
	}

	/// Total node capacity of the buffers currently waiting in the pool.
	pub fn idle_capacity(&self) -> usize {
		self.shared.idle.lock().iter().map(Slab::capacity).sum()
	}

	/// Hands out a pooled buffer, or an unallocated one when the pool is empty.
	pub(crate) fn take(&self) -> Slab<Node<K, V>> {
		match self.shared.idle.lock().pop() {
			Some(buffer) => {
				tracing::trace!(capacity = buffer.capacity(), "reusing pooled node buffer");
				buffer
			}
			None => Slab::new(),
		}
	}

	/// Takes a buffer back. Whatever it still holds is dropped first, outside
	/// the lock.
	pub(crate) fn put(&self, mut buffer: Slab<Node<K, V>>) {
		buffer.clear();
		if buffer.capacity() == 0 {
			return;
		}

		let mut idle = self.shared.idle.lock();
		if idle.len() < self.shared.limit {
			tracing::trace!(capacity = buffer.capacity(), "returning node buffer to pool");
			idle.push(buffer);
		} else {
			drop(idle);
			tracing::trace!(capacity = buffer.capacity(), "pool full, freeing node buffer");
		}
	}
}

impl<K, V> Clone for NodePool<K, V> {
	fn clone(&self) -> Self {
		NodePool {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<K, V> Default for NodePool<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V> fmt::Debug for NodePool<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NodePool")
			.field("idle", &self.idle())
			.field("limit", &self.shared.limit)
			.finish()
	}
}
