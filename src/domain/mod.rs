//! # Domain Layer
//!
//! Pure data-structure logic: hashing primitives, the three tree variants
//! and the multi-tier state cache. Persistence stays behind the
//! `ports::database` seam.
//!
//! ## Modules
//!
//! - `hashing`: SHA3-256 digests and hex edge helpers
//! - `nibbles`: half-byte path expansion
//! - `errors`: error taxonomy
//! - `cancel`: cooperative cancellation for long collections
//! - `hex_trie`: in-memory fixed-length hex-key Merkle trie
//! - `wmpt`: persistent weighted Merkle Patricia trie
//! - `verkle`: vector-committed trie with file-rooted storage
//! - `cache`: transaction/block/global state cache tiers

pub mod cache;
pub mod cancel;
pub mod errors;
pub mod hashing;
pub mod hex_trie;
pub mod nibbles;
pub mod verkle;
pub mod wmpt;

pub use cancel::CancelToken;
pub use errors::{StorageError, TrieError, VerkleError};
pub use hashing::{empty_state_hash, raw_hash, Hash, HASH_LENGTH};
pub use hex_trie::HexKeyTrie;
