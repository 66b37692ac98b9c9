//! Synchronization primitives with loom support.
//!
//! Under normal compilation, re-exports from std/parking_lot.
//! Under `cfg(loom)`, uses loom's equivalents for deterministic testing.
//!
//! Only the node pool is shared between threads, so this module is all the
//! locking the crate does. Trees and cursors are never synchronized.

#[cfg(not(loom))]
pub(crate) use std::sync::Arc;

#[cfg(loom)]
pub(crate) use loom::sync::Arc;

// ===========================================================================
// Mutex
// ===========================================================================

// parking_lot::Mutex hands out guards directly while loom's Mutex returns a
// LockResult, so loom gets a thin wrapper with the parking_lot shape.

#[cfg(not(loom))]
pub(crate) use parking_lot::Mutex;

#[cfg(loom)]
mod loom_mutex {
	//! Wrapper around loom's Mutex to match parking_lot's API.

	use loom::sync::{Mutex as LoomMutex, MutexGuard};

	/// A wrapper around loom's Mutex that provides a parking_lot-compatible API.
	pub(crate) struct Mutex<T>(LoomMutex<T>);

	impl<T> Mutex<T> {
		/// Creates a new Mutex.
		pub(crate) fn new(value: T) -> Self {
			Mutex(LoomMutex::new(value))
		}

		/// Acquires the lock, blocking until available.
		pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
			// Poisoning cannot happen under the model: a panicking thread fails the model.
			match self.0.lock() {
				Ok(guard) => guard,
				Err(poisoned) => poisoned.into_inner(),
			}
		}
	}
}

#[cfg(loom)]
pub(crate) use loom_mutex::Mutex;
