//! # Concurrency Tests for avltree
//!
//! Trees are single-threaded, so the only shared state is a [`NodePool`]
//! handed to trees that live on different threads. These tests drive many
//! such trees at once and check that every tree stays correct and that the
//! pool neither loses nor duplicates buffers.
//!
//! ## Test Categories
//!
//! - Basic concurrent tests: Lower contention, always run
//! - Stress tests: Higher contention, marked with `#[ignore]` - run with `cargo test -- --ignored`

#![cfg(not(loom))]

use avltree::{Natural, NodePool, Options, Tree};
use rand::prelude::*;
use std::collections::BTreeMap;
use std::sync::Barrier;
use std::sync::Arc;
use std::thread;

fn pooled(pool: &NodePool<u32, u64>) -> Tree<u32, u64> {
	Tree::with_options(Natural, Options::new().with_pool(pool.clone()))
}

// ===========================================================================
// Shared Pool Tests
// ===========================================================================

#[test]
fn threads_build_trees_from_one_pool() {
	let pool = NodePool::new();
	let num_threads = 4;
	let barrier = Arc::new(Barrier::new(num_threads as usize));

	let handles: Vec<_> = (0..num_threads)
		.map(|t| {
			let pool = pool.clone();
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				let mut tree = pooled(&pool);
				tree.add(0, 0);
				// Nobody gives a buffer back before everyone has taken one.
				barrier.wait();
				for i in 0..1_000 {
					tree.add(i, u64::from(i) * t);
				}
				tree.assert_invariants();
				for i in 0..1_000 {
					assert_eq!(tree.find(&i), Some(u64::from(i) * t));
				}
				tree.len()
			})
		})
		.collect();

	for h in handles {
		assert_eq!(h.join().unwrap(), 1_000);
	}

	// Every tree gave its buffer back on drop.
	assert_eq!(pool.idle(), num_threads as usize);
}

#[test]
fn buffers_migrate_between_threads() {
	let pool = NodePool::new();

	// Fill the pool from one thread...
	{
		let pool = pool.clone();
		thread::spawn(move || {
			let mut tree = pooled(&pool);
			tree.extend((0..10_000).map(|i| (i, 0)));
		})
		.join()
		.unwrap();
	}
	assert_eq!(pool.idle(), 1);
	let capacity = pool.idle_capacity();

	// ...and drain it from another.
	{
		let pool = pool.clone();
		thread::spawn(move || {
			let mut tree = pooled(&pool);
			tree.add(1, 1);
			assert_eq!(pool.idle(), 0);
			tree.clear();
		})
		.join()
		.unwrap();
	}
	assert_eq!(pool.idle(), 1);
	assert_eq!(pool.idle_capacity(), capacity);
}

#[test]
fn concurrent_churn_matches_oracle() {
	let pool = NodePool::with_limit(4);
	let barrier = Arc::new(Barrier::new(6));

	let handles: Vec<_> = (0..6u64)
		.map(|t| {
			let pool = pool.clone();
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				let mut rng = StdRng::seed_from_u64(t);
				barrier.wait();

				for _ in 0..20 {
					let mut tree = pooled(&pool);
					let mut oracle = BTreeMap::new();
					for _ in 0..500 {
						let k = rng.random_range(0..300u32);
						if rng.random_bool(0.7) {
							assert_eq!(tree.add(k, t), oracle.insert(k, t));
						} else {
							assert_eq!(tree.remove(&k), oracle.remove(&k));
						}
					}
					tree.assert_invariants();
					assert!(tree.cursor().eq(oracle.into_iter()));
				}
			})
		})
		.collect();

	for h in handles {
		h.join().unwrap();
	}
	assert!(pool.idle() <= 4);
}

// ===========================================================================
// Stress Tests
// ===========================================================================

#[test]
#[ignore]
fn stress_pool_contention() {
	let pool = NodePool::with_limit(2);
	let num_threads = 16;

	let handles: Vec<_> = (0..num_threads)
		.map(|t| {
			let pool = pool.clone();
			thread::spawn(move || {
				for round in 0..2_000u32 {
					let mut tree = pooled(&pool);
					for i in 0..(round % 64) {
						tree.add(i, t);
					}
					assert_eq!(tree.len(), (round % 64) as usize);
				}
			})
		})
		.collect();

	for h in handles {
		h.join().unwrap();
	}
	assert!(pool.idle() <= 2);
}
