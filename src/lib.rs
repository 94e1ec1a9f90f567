//! # state-store
//!
//! Authenticated state storage for a blockchain node: a family of
//! cryptographically verifiable key-value trees plus a multi-version,
//! block-scoped cache in front of them.
//!
//! ## Components
//!
//! - **Fixed-length hex-key Merkle trie** (`domain::hex_trie`): in-memory,
//!   weighted, 16-ary; for small fixed-schema state maps
//! - **Weighted Merkle Patricia Trie** (`domain::wmpt`): persistent, with
//!   weight-indexed proofs, multi-key path proofs, collapse-on-commit and
//!   rollback
//! - **Verkle trie** (`domain::verkle`): vector-committed, file-rooted
//!   storage with multiproofs
//! - **State cache** (`domain::cache`): transaction → block → global
//!   tiers, ordered by the block-hash chain
//!
//! Trees persist through the narrow `ports::database` seam; an in-memory
//! adapter ships by default and a RocksDB adapter sits behind the
//! `rocksdb-store` feature.
//!
//! ## Guarantees
//!
//! - root hashes are insertion-order independent
//! - proofs of membership, absence and weight-indexed lookup verify
//!   against a trusted root alone
//! - commits are atomic batches with rollback and reference-counted
//!   node deletion
//! - cache reads never cross a broken ancestry link

pub mod adapters;
pub mod domain;
pub mod ports;

pub use adapters::MemoryDb;
#[cfg(feature = "rocksdb-store")]
pub use adapters::RocksDb;
pub use domain::cache::{new_block_txn_caches, Block, BlockCache, CacheConfig, CacheStats, StateCache, TransactionCache};
pub use domain::verkle::VerkleTrie;
pub use domain::wmpt::WeightedMerkleTrie;
pub use domain::{CancelToken, Hash, HexKeyTrie, StorageError, TrieError, VerkleError};
pub use ports::database::{Batcher, StorageAdapter};
