//! # Weighted Merkle Patricia Trie
//!
//! Persistent, weighted, 16-ary Patricia trie with path-compressed short
//! nodes, weight-indexed proofs, multi-key path extraction, collapse on
//! commit and rollback bookkeeping.
//!
//! ## Modules
//!
//! - `node`: tagged node variants and canonical hash composition
//! - `codec`: tag-discriminated wire records and proof framing
//! - `trie`: update/delete/get, commit, rollback
//! - `proof`: weight-indexed block proofs
//! - `path`: multi-key path proofs and partial-tree reconstruction

pub mod codec;
pub mod node;
pub mod path;
pub mod proof;
pub mod trie;

pub use node::{BranchNode, HashRefNode, Node, ShortNode, ValueNode};
pub use trie::{WeightedMerkleTrie, EXTERNAL_KEY_LENGTH};
