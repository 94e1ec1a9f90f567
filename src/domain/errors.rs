//! # Error Types
//!
//! Every error here is recoverable; no public API panics in release builds.
//! Internal invariant violations (unknown node shapes during mutation, a
//! branch left with no surviving child after reduction) are code defects and
//! are guarded with `debug_assert!` instead of error variants.

use thiserror::Error;

/// Storage adapter failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Key absent from the store. Translated to `TrieError::KeyNotFound`
    /// at the trie boundary.
    #[error("key not found in storage")]
    NotFound,

    /// Underlying store failure (RocksDB, etc.). Callers may retry.
    #[error("storage io error: {0}")]
    Io(String),
}

/// Trie operation failures, shared by the hex trie and the WMPT.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    /// Lookup miss. Non-fatal; callers usually treat it as absence.
    #[error("key not found")]
    KeyNotFound,

    /// External key has the wrong length. Fatal to the call.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    /// Hex-keyed trie received a key byte outside `[0-9a-fA-F]`. Fatal to
    /// the call.
    #[error("invalid hex digit in key: {0:#04x}")]
    InvalidHexDigit(u8),

    /// Weight-indexed proof requested beyond the total tree weight.
    #[error("weight {weight} not in range (total {total})")]
    WeightOutOfRange { weight: u64, total: u64 },

    /// A deserialized proof links a parent to a child whose recomputed hash
    /// does not match. The proof is forged or corrupt.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Empty proof, truncated record or unknown tag.
    #[error("malformed proof: {0}")]
    ProofMalformed(String),

    /// The caller cancelled a long-running collection; partial output was
    /// discarded at a worker boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// Adapter failure, propagated verbatim.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for TrieError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => TrieError::KeyNotFound,
            other => TrieError::Storage(other),
        }
    }
}

/// Verkle trie failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerkleError {
    /// A referenced node is missing from the backing store.
    #[error("missing node")]
    MissingNode,

    /// Proof rejected: malformed structure or commitment mismatch.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// A stored leaf record could not be decoded.
    #[error("corrupt node record: {0}")]
    CorruptNode(String),

    /// Adapter failure, propagated verbatim.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for VerkleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => VerkleError::MissingNode,
            other => VerkleError::Storage(other),
        }
    }
}
