//! # Hashing Primitives
//!
//! SHA3-256 digests over canonical node encodings, plus the hex helpers used
//! at API edges.
//!
//! Every authenticated structure in this crate derives its identity from
//! `raw_hash`; the empty-subtree sentinel is the digest of the empty string
//! and is computed exactly once.

use sha3::{Digest, Sha3_256};
use std::sync::OnceLock;

/// Fixed digest width for every tree in the crate.
pub const HASH_LENGTH: usize = 32;

/// A 32-byte SHA3-256 digest.
pub type Hash = [u8; HASH_LENGTH];

/// Compute the SHA3-256 digest of the given bytes.
pub fn raw_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest of the empty string: the root hash of every empty trie and the
/// contribution of an absent branch child.
pub fn empty_state_hash() -> Hash {
    static EMPTY: OnceLock<Hash> = OnceLock::new();
    *EMPTY.get_or_init(|| raw_hash(b""))
}

/// Hex-encode arbitrary bytes (lowercase).
pub fn to_hex(buf: &[u8]) -> String {
    hex::encode(buf)
}

/// Decode a hex string; `None` if the string is not valid hex.
pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s).ok()
}

/// Hash the data and return the digest as a hex string.
pub fn hash_to_hex(data: &[u8]) -> String {
    to_hex(&raw_hash(data))
}

/// Decode a hex hash string into digest bytes; `None` on bad hex or length.
pub fn hash_string_to_bytes(s: &str) -> Option<Hash> {
    let bytes = from_hex(s)?;
    if bytes.len() != HASH_LENGTH {
        return None;
    }
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&bytes);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_hash_is_sha3_of_empty_string() {
        assert_eq!(empty_state_hash(), raw_hash(b""));
        assert_eq!(
            to_hex(&empty_state_hash()),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn test_raw_hash_deterministic() {
        assert_eq!(raw_hash(b"hello"), raw_hash(b"hello"));
        assert_ne!(raw_hash(b"hello"), raw_hash(b"hullo"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = raw_hash(b"abc");
        let s = hash_to_hex(b"abc");
        assert_eq!(hash_string_to_bytes(&s), Some(h));
        assert_eq!(hash_string_to_bytes("zz"), None);
        assert_eq!(hash_string_to_bytes("abcd"), None); // wrong length
    }
}
