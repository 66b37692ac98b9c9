//! A circular doubly-linked list with O(1) self-unlinking entries.
//!
//! Entries live in a [`Slab`] owned by the [`List`] and link to each other by
//! key. Each entry starts out linked only to itself; [`List::link_next`]
//! and [`List::link_prev`] splice it into a ring, and [`List::unlink`] takes
//! it out again without needing to know where it sits. A [`Handle`] names an
//! entry together with the generation it was stamped with on insertion, so a
//! handle that outlived its entry is recognised as stale instead of reaching
//! whatever reused the slot.
//!
//! Every list has a head entry that carries no value. Walking `next` from the
//! head visits the ring in link order and arrives back at the head.
//!
//! ```
//! use avltree::list::List;
//!
//! let mut list = List::new();
//! let head = list.head();
//! let a = list.insert('a');
//! let b = list.insert('b');
//! list.link_prev(head, a); // append
//! list.link_prev(head, b);
//! assert_eq!(list.iter().copied().collect::<String>(), "ab");
//!
//! list.unlink(a);
//! list.unlink(a); // already unlinked, nothing happens
//! assert!(!list.is_linked(a));
//! assert_eq!(list.iter().copied().collect::<String>(), "b");
//! ```

use slab::Slab;

const HEAD: usize = 0;

/// Names an entry of a [`List`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
	key: usize,
	generation: u32,
}

struct Entry<T> {
	next: usize,
	prev: usize,
	generation: u32,
	value: Option<T>,
}

/// Slab-backed circular list of `T`.
pub struct List<T> {
	entries: Slab<Entry<T>>,
	/// Stamp given to the next inserted entry. Never reused until it wraps.
	generation: u32,
}

impl<T> List<T> {
	/// Creates a list holding only its head.
	pub fn new() -> Self {
		let mut entries = Slab::new();
		entries.insert(Entry {
			next: HEAD,
			prev: HEAD,
			generation: 0,
			value: None,
		});
		List {
			entries,
			generation: 1,
		}
	}

	/// The head entry.
	pub fn head(&self) -> Handle {
		Handle {
			key: HEAD,
			generation: 0,
		}
	}

	/// Number of entries holding a value, linked or not.
	pub fn len(&self) -> usize {
		self.entries.len() - 1
	}

	/// Returns `true` if no entry holds a value.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Stores `value` in a new entry that is linked only to itself.
	pub fn insert(&mut self, value: T) -> Handle {
		let generation = self.generation;
		self.generation = self.generation.wrapping_add(1).max(1);

		let entry = self.entries.vacant_entry();
		let key = entry.key();
		entry.insert(Entry {
			next: key,
			prev: key,
			generation,
			value: Some(value),
		});
		Handle {
			key,
			generation,
		}
	}

	fn slot(&self, handle: Handle) -> Option<usize> {
		let entry = self.entries.get(handle.key)?;
		(entry.generation == handle.generation).then_some(handle.key)
	}

	fn handle_of(&self, key: usize) -> Handle {
		Handle {
			key,
			generation: self.entries[key].generation,
		}
	}

	/// Returns `true` if `handle` names a live entry of this list.
	pub fn contains(&self, handle: Handle) -> bool {
		self.slot(handle).is_some()
	}

	/// Links the ring containing `other` right after `at`.
	///
	/// Stale handles make this a no-op.
	pub fn link_next(&mut self, at: Handle, other: Handle) {
		let (Some(e), Some(o)) = (self.slot(at), self.slot(other)) else {
			return;
		};
		let t = self.entries[o].prev;
		let e_next = self.entries[e].next;
		self.entries[e_next].prev = t;
		self.entries[t].next = e_next;
		self.entries[o].prev = e;
		self.entries[e].next = o;
	}

	/// Links the ring containing `other` right before `at`.
	///
	/// Stale handles make this a no-op.
	pub fn link_prev(&mut self, at: Handle, other: Handle) {
		let (Some(e), Some(o)) = (self.slot(at), self.slot(other)) else {
			return;
		};
		let t = self.entries[o].prev;
		let e_prev = self.entries[e].prev;
		self.entries[e_prev].next = o;
		self.entries[t].next = e;
		self.entries[o].prev = e_prev;
		self.entries[e].prev = t;
	}

	/// Takes the entry out of whatever ring it is in. Unlinking an entry that
	/// is not linked, or a stale handle, does nothing.
	pub fn unlink(&mut self, handle: Handle) {
		let Some(e) = self.slot(handle) else {
			return;
		};
		let Entry {
			next,
			prev,
			..
		} = self.entries[e];
		self.entries[next].prev = prev;
		self.entries[prev].next = next;
		let entry = &mut self.entries[e];
		entry.next = e;
		entry.prev = e;
	}

	/// Reports whether the entry is linked to any other entry. For the head
	/// this tells whether the list has linked entries at all.
	pub fn is_linked(&self, handle: Handle) -> bool {
		self.slot(handle).is_some_and(|e| self.entries[e].next != e)
	}

	/// The entry following `handle`, which is `handle` itself when unlinked.
	pub fn next(&self, handle: Handle) -> Option<Handle> {
		let e = self.slot(handle)?;
		Some(self.handle_of(self.entries[e].next))
	}

	/// The entry preceding `handle`, which is `handle` itself when unlinked.
	pub fn prev(&self, handle: Handle) -> Option<Handle> {
		let e = self.slot(handle)?;
		Some(self.handle_of(self.entries[e].prev))
	}

	/// The value stored in the entry, `None` for the head and stale handles.
	pub fn get(&self, handle: Handle) -> Option<&T> {
		let e = self.slot(handle)?;
		self.entries[e].value.as_ref()
	}

	/// Mutable access to the value stored in the entry, `None` for the head
	/// and stale handles.
	pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
		let e = self.slot(handle)?;
		self.entries[e].value.as_mut()
	}

	/// Unlinks the entry and frees its slot, returning the value.
	///
	/// The head cannot be removed.
	pub fn remove(&mut self, handle: Handle) -> Option<T> {
		if handle.key == HEAD {
			return None;
		}
		self.unlink(handle);
		let e = self.slot(handle)?;
		self.entries.remove(e).value
	}

	/// Frees every entry. All outstanding handles other than the head's
	/// become stale.
	pub fn clear(&mut self) {
		self.entries.retain(|key, _| key == HEAD);
		let head = &mut self.entries[HEAD];
		head.next = HEAD;
		head.prev = HEAD;
	}

	/// Values of the entries linked into the head's ring, in link order.
	pub fn iter(&self) -> Iter<'_, T> {
		Iter {
			list: self,
			at: self.entries[HEAD].next,
		}
	}
}

impl<T> Default for List<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Iterator over the values linked into a list's head ring.
pub struct Iter<'a, T> {
	list: &'a List<T>,
	at: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
	type Item = &'a T;

	fn next(&mut self) -> Option<&'a T> {
		while self.at != HEAD {
			let entry = &self.list.entries[self.at];
			self.at = entry.next;
			if let Some(value) = entry.value.as_ref() {
				return Some(value);
			}
		}
		None
	}
}
