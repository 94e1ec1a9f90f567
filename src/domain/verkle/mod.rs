//! # Verkle Trie
//!
//! A 256-wide trie over a vector-commitment scheme, exposed as file-rooted
//! storage with multiproof support.
//!
//! ## Modules
//!
//! - `committer`: Pedersen vector commitments over Ristretto
//! - `tree_key`: stem/suffix key derivation and storage layout constants
//! - `node`: node variants, commitment computation, storage records
//! - `trie`: slot operations, the file-meta layer, flush
//! - `proof`: multiproofs with state diffs, presence/absence verification

pub mod committer;
pub mod node;
pub mod proof;
pub mod tree_key;
pub mod trie;

pub use proof::{
    verify_proof, verify_proof_absence, verify_proof_presence_file_meta, ProofNode, StateDiff,
    StateDiffEntry, VerkleProof,
};
pub use trie::VerkleTrie;
