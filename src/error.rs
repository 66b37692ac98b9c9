//! # Error Types for the AVL Tree
//!
//! Ordinary outcomes never fail: a missing key, an empty tree or a closed
//! cursor are reported through `Option`. The errors in this module describe
//! broken structural invariants and are produced only by
//! [`Tree::check_invariants`](crate::Tree::check_invariants), which walks the
//! whole tree and reports the first violation it finds.
//!
//! ## Common Patterns
//!
//! ```
//! use avltree::Tree;
//!
//! let mut tree = Tree::new();
//! for i in 0..100 {
//!     tree.add(i, i * 2);
//! }
//!
//! match tree.check_invariants() {
//!     Ok(()) => {}
//!     Err(e) => panic!("corrupt tree: {e}"),
//! }
//! ```

use thiserror::Error;

/// Structural invariant violations found while validating a tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// The subtree heights below a node differ by more than one.
	#[error("node at depth {depth} is unbalanced: left height {left}, right height {right}")]
	Unbalanced {
		/// Depth of the offending node (the root is at depth 0).
		depth: usize,
		/// Height of the left subtree.
		left: usize,
		/// Height of the right subtree.
		right: usize,
	},

	/// The balance factor stored in a node disagrees with its subtree heights.
	///
	/// The tree may still be balanced, but the next insertion or removal that
	/// retraces through this node will pick the wrong rotation.
	#[error("node at depth {depth} stores balance factor {stored} but its subtrees give {computed}")]
	BalanceFactor {
		/// Depth of the offending node.
		depth: usize,
		/// Balance factor kept in the node.
		stored: i8,
		/// Right height minus left height as measured.
		computed: isize,
	},

	/// A child sits on the wrong side of its parent under the comparator.
	#[error("child at depth {depth} is out of order relative to its parent")]
	Unsorted {
		/// Depth of the misplaced child.
		depth: usize,
	},

	/// The cached association count does not match the reachable nodes.
	#[error("tree reports {reported} associations but {reachable} are reachable")]
	LengthMismatch {
		/// Count kept by the tree.
		reported: usize,
		/// Nodes found by walking from the root.
		reachable: usize,
	},

	/// The tree grew taller than the traversal stacks are sized for.
	#[error("tree height {height} exceeds the supported maximum of {max}")]
	TooTall {
		/// Measured height.
		height: usize,
		/// [`MAX_TREE_HEIGHT`](crate::MAX_TREE_HEIGHT).
		max: usize,
	},
}

/// A Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;
