//! # Verkle Tree Key Derivation
//!
//! Deterministic mapping from `(address, tree_index, sub_index)` to a
//! 32-byte tree key: a Pedersen hash of a 5-coefficient polynomial with the
//! final byte overwritten by the sub-index. The first 31 bytes form the
//! stem, the last byte selects one of 256 slots in a leaf.
//!
//! ## Storage layout per file
//!
//! - suffix 0: version slot
//! - suffix 1: file content root hash
//! - suffix 2: total stored value size (big-endian, 32 bytes)
//! - chunk `i` of the value body lives in the header area while it fits,
//!   then in the main storage area anchored at tree index `2^248`

use crate::domain::verkle::committer::{committer, point_to_digest, scalar_from_le_bytes};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use std::sync::OnceLock;

pub const VERSION_LEAF_KEY: u8 = 0;
pub const FILE_HASH_LEAF_KEY: u8 = 1;
pub const STORAGE_SIZE_LEAF_KEY: u8 = 2;
pub const HEADER_STORAGE_OFFSET: u64 = 16;
pub const VERKLE_NODE_WIDTH: u64 = 256;
/// Value bytes each tree slot holds.
pub const CHUNK_SIZE: u64 = 32;
/// Header area holds exactly 7168 value bytes; the next chunk spills into
/// main storage.
pub const HEADER_STORAGE_CAP_BYTES: u64 = 7168;
pub const HEADER_STORAGE_CAP_CHUNKS: u64 = HEADER_STORAGE_CAP_BYTES / CHUNK_SIZE;

/// Length of the stem shared by all slots of one leaf.
pub const STEM_LENGTH: usize = 31;

pub type TreeKey = [u8; 32];
pub type TreeIndex = [u8; 32]; // big-endian 256-bit index

/// Constant point for the polynomial's index-0 marker term `2 + 256 * 64`,
/// computed once at startup.
fn index0_point() -> &'static RistrettoPoint {
    static POINT: OnceLock<RistrettoPoint> = OnceLock::new();
    POINT.get_or_init(|| {
        committer().commit_sparse(&[(0, Scalar::from(2u64 + 256 * 64))])
    })
}

/// Pedersen-hash the `(address, tree_index)` pair and stamp the sub-index
/// into the final byte.
pub fn get_tree_key(address: &[u8], tree_index: &TreeIndex, sub_index: u8) -> TreeKey {
    let mut aligned = [0u8; 32];
    let offset = 32usize.saturating_sub(address.len());
    aligned[offset..].copy_from_slice(&address[..address.len().min(32)]);

    // poly = [marker, addr_le_low, addr_le_high, index_low, index_high];
    // the marker term is precomputed as a constant point.
    let addr_low = scalar_from_le_bytes(&aligned[..16]);
    let addr_high = scalar_from_le_bytes(&aligned[16..]);
    // The index is big-endian; its halves flip to little-endian scalars.
    let mut low = tree_index[16..].to_vec();
    low.reverse();
    let mut high = tree_index[..16].to_vec();
    high.reverse();
    let index_low = scalar_from_le_bytes(&low);
    let index_high = scalar_from_le_bytes(&high);

    let mut point = committer().commit_sparse(&[
        (1, addr_low),
        (2, addr_high),
        (3, index_low),
        (4, index_high),
    ]);
    point += index0_point();

    let mut key = point_to_digest(&point);
    key[31] = sub_index;
    key
}

pub fn zero_index() -> TreeIndex {
    [0u8; 32]
}

/// Tree key of the file content root hash slot.
pub fn tree_key_for_file_hash(filepath_hash: &[u8]) -> TreeKey {
    get_tree_key(filepath_hash, &zero_index(), FILE_HASH_LEAF_KEY)
}

/// Tree key of the stored value size slot.
pub fn tree_key_for_storage_size(filepath_hash: &[u8]) -> TreeKey {
    get_tree_key(filepath_hash, &zero_index(), STORAGE_SIZE_LEAF_KEY)
}

/// Tree key of value chunk `chunk_index`: header slots while they last,
/// then the main storage area at offset `2^248`.
pub fn tree_key_for_storage_slot(filepath_hash: &[u8], chunk_index: u64) -> TreeKey {
    let mut pos = [0u8; 32];
    if chunk_index < HEADER_STORAGE_CAP_CHUNKS {
        let slot = HEADER_STORAGE_OFFSET + chunk_index; // stays below 256
        pos[31] = slot as u8;
    } else {
        // pos = 2^248 + chunk_index, big-endian.
        pos[0] = 0x01;
        pos[24..].copy_from_slice(&chunk_index.to_be_bytes());
    }

    // divmod by the node width: shift one byte right, the remainder is the
    // sub-index.
    let sub_index = pos[31];
    let mut tree_index = [0u8; 32];
    tree_index[1..].copy_from_slice(&pos[..31]);
    get_tree_key(filepath_hash, &tree_index, sub_index)
}

/// Split a 32-byte tree key into its stem and suffix.
pub fn split_tree_key(key: &TreeKey) -> ([u8; STEM_LENGTH], u8) {
    let mut stem = [0u8; STEM_LENGTH];
    stem.copy_from_slice(&key[..STEM_LENGTH]);
    (stem, key[31])
}
