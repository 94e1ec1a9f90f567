//! # Verkle Node Variants
//!
//! A 256-wide commitment trie: internal nodes route on successive stem
//! bytes, leaves hold the 256 value slots of one stem. Persisted subtrees
//! appear as `Unresolved` references carrying only their digest and path,
//! the verkle counterpart of the WMPT hash-ref.
//!
//! ## Commitment layout
//!
//! - internal node: `Commit(field(child_0) … field(child_255))`
//! - leaf: values split into low/high scalar pairs; slots 0..127 feed `C1`,
//!   slots 128..255 feed `C2`, and the leaf commits to
//!   `[1, stem, field(C1), field(C2)]`
//!
//! An absent subtree contributes the zero coefficient, so the empty digest
//! is the compressed identity.

use crate::domain::errors::VerkleError;
use crate::domain::verkle::committer::{
    committer, digest_to_scalar, point_to_digest, scalar_from_le_bytes, value_to_scalar_pair,
    CommitDigest, EMPTY_COMMIT_DIGEST,
};
use crate::domain::verkle::tree_key::STEM_LENGTH;
use curve25519_dalek::scalar::Scalar;

pub const NODE_WIDTH: usize = 256;

const TAG_INTERNAL: u8 = 1;
const TAG_LEAF: u8 = 2;

pub type Stem = [u8; STEM_LENGTH];
pub type SlotValue = [u8; 32];

#[derive(Clone, Debug, Default)]
pub enum VerkleNode {
    #[default]
    Empty,
    Internal(InternalNode),
    Leaf(LeafNode),
    /// Persisted subtree known only by digest; resolved through storage at
    /// its stem-prefix path.
    Unresolved(UnresolvedNode),
}

#[derive(Clone, Debug)]
pub struct UnresolvedNode {
    pub digest: CommitDigest,
    pub path: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct InternalNode {
    pub children: Vec<VerkleNode>, // always NODE_WIDTH entries
    pub digest: CommitDigest,
    pub dirty: bool,
    /// Cleared on mutation, set by flush; a clean commitment can still be
    /// unpersisted.
    pub persisted: bool,
}

#[derive(Clone, Debug)]
pub struct LeafNode {
    pub stem: Stem,
    pub values: Vec<Option<SlotValue>>, // always NODE_WIDTH entries
    pub digest: CommitDigest,
    pub dirty: bool,
    pub persisted: bool,
}

impl InternalNode {
    pub fn new() -> Self {
        Self {
            children: vec![VerkleNode::Empty; NODE_WIDTH],
            digest: EMPTY_COMMIT_DIGEST,
            dirty: true,
            persisted: false,
        }
    }
}

impl Default for InternalNode {
    fn default() -> Self {
        Self::new()
    }
}

impl LeafNode {
    pub fn new(stem: Stem) -> Self {
        Self {
            stem,
            values: vec![None; NODE_WIDTH],
            digest: EMPTY_COMMIT_DIGEST,
            dirty: true,
            persisted: false,
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Recompute this leaf's commitment digest from its slots.
    pub fn compute_digest(&self) -> CommitDigest {
        let c = committer();
        let mut sub = [Vec::new(), Vec::new()];
        for (slot, value) in self.values.iter().enumerate() {
            if let Some(value) = value {
                let (low, high) = value_to_scalar_pair(value);
                let half = &mut sub[slot / 128];
                let base = (slot % 128) * 2;
                half.push((base, low));
                half.push((base + 1, high));
            }
        }
        let c1 = point_to_digest(&c.commit_sparse(&sub[0]));
        let c2 = point_to_digest(&c.commit_sparse(&sub[1]));
        let point = c.commit_sparse(&[
            (0, Scalar::from(1u64)),
            (1, scalar_from_le_bytes(&self.stem)),
            (2, digest_to_scalar(&c1)),
            (3, digest_to_scalar(&c2)),
        ]);
        point_to_digest(&point)
    }
}

impl VerkleNode {
    pub fn is_empty(&self) -> bool {
        matches!(self, VerkleNode::Empty)
    }

    /// Current digest. Stale while the node is dirty.
    pub fn digest(&self) -> CommitDigest {
        match self {
            VerkleNode::Empty => EMPTY_COMMIT_DIGEST,
            VerkleNode::Internal(n) => n.digest,
            VerkleNode::Leaf(n) => n.digest,
            VerkleNode::Unresolved(n) => n.digest,
        }
    }

    pub fn dirty(&self) -> bool {
        match self {
            VerkleNode::Internal(n) => n.dirty,
            VerkleNode::Leaf(n) => n.dirty,
            VerkleNode::Empty | VerkleNode::Unresolved(_) => false,
        }
    }

    /// True once the current shape of this node is in storage.
    pub fn persisted(&self) -> bool {
        match self {
            VerkleNode::Internal(n) => n.persisted,
            VerkleNode::Leaf(n) => n.persisted,
            VerkleNode::Empty | VerkleNode::Unresolved(_) => true,
        }
    }

    /// Recompute commitments bottom-up, clearing dirty flags.
    pub fn calc_commitment(&mut self) -> CommitDigest {
        match self {
            VerkleNode::Empty => EMPTY_COMMIT_DIGEST,
            VerkleNode::Unresolved(n) => n.digest,
            VerkleNode::Leaf(n) => {
                if n.dirty {
                    n.digest = n.compute_digest();
                    n.dirty = false;
                }
                n.digest
            }
            VerkleNode::Internal(n) => {
                if n.dirty {
                    let mut coeffs = Vec::new();
                    for (slot, child) in n.children.iter_mut().enumerate() {
                        let digest = child.calc_commitment();
                        if digest != EMPTY_COMMIT_DIGEST {
                            coeffs.push((slot, digest_to_scalar(&digest)));
                        }
                    }
                    n.digest = point_to_digest(&committer().commit_sparse(&coeffs));
                    n.dirty = false;
                }
                n.digest
            }
        }
    }
}

// =============================================================================
// NODE RECORDS
// =============================================================================

/// Serialize a node for path-addressed storage. Digests must be current.
pub fn encode_verkle_node(node: &VerkleNode) -> Result<Vec<u8>, VerkleError> {
    debug_assert!(!node.dirty());
    match node {
        VerkleNode::Internal(n) => {
            let mut out = Vec::with_capacity(1 + 32 + NODE_WIDTH * 32);
            out.push(TAG_INTERNAL);
            out.extend_from_slice(&n.digest);
            for child in &n.children {
                out.extend_from_slice(&child.digest());
            }
            Ok(out)
        }
        VerkleNode::Leaf(n) => {
            let mut bitmap = [0u8; NODE_WIDTH / 8];
            let mut body = Vec::new();
            for (slot, value) in n.values.iter().enumerate() {
                if let Some(value) = value {
                    bitmap[slot / 8] |= 1 << (slot % 8);
                    body.extend_from_slice(value);
                }
            }
            let mut out = Vec::with_capacity(1 + 32 + STEM_LENGTH + bitmap.len() + body.len());
            out.push(TAG_LEAF);
            out.extend_from_slice(&n.digest);
            out.extend_from_slice(&n.stem);
            out.extend_from_slice(&bitmap);
            out.extend_from_slice(&body);
            Ok(out)
        }
        VerkleNode::Empty | VerkleNode::Unresolved(_) => Err(VerkleError::CorruptNode(
            "references are not persisted standalone".into(),
        )),
    }
}

/// Decode a stored record at `path`. Children of an internal node come back
/// as unresolved references.
pub fn decode_verkle_node(data: &[u8], path: &[u8]) -> Result<VerkleNode, VerkleError> {
    let corrupt = |msg: &str| VerkleError::CorruptNode(msg.to_string());
    if data.is_empty() {
        return Err(corrupt("empty record"));
    }
    match data[0] {
        TAG_INTERNAL => {
            let expected = 1 + 32 + NODE_WIDTH * 32;
            if data.len() != expected {
                return Err(corrupt("bad internal record length"));
            }
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&data[1..33]);
            let mut node = InternalNode::new();
            node.digest = digest;
            node.dirty = false;
            node.persisted = true;
            for slot in 0..NODE_WIDTH {
                let start = 33 + slot * 32;
                let mut child_digest = [0u8; 32];
                child_digest.copy_from_slice(&data[start..start + 32]);
                if child_digest != EMPTY_COMMIT_DIGEST {
                    let mut child_path = path.to_vec();
                    child_path.push(slot as u8);
                    node.children[slot] = VerkleNode::Unresolved(UnresolvedNode {
                        digest: child_digest,
                        path: child_path,
                    });
                }
            }
            Ok(VerkleNode::Internal(node))
        }
        TAG_LEAF => {
            let header = 1 + 32 + STEM_LENGTH + NODE_WIDTH / 8;
            if data.len() < header {
                return Err(corrupt("truncated leaf record"));
            }
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&data[1..33]);
            let mut stem = [0u8; STEM_LENGTH];
            stem.copy_from_slice(&data[33..33 + STEM_LENGTH]);
            let bitmap = &data[33 + STEM_LENGTH..header];
            let mut node = LeafNode::new(stem);
            node.digest = digest;
            node.dirty = false;
            node.persisted = true;
            let mut cursor = header;
            for slot in 0..NODE_WIDTH {
                if bitmap[slot / 8] & (1 << (slot % 8)) != 0 {
                    if cursor + 32 > data.len() {
                        return Err(corrupt("leaf body shorter than bitmap"));
                    }
                    let mut value = [0u8; 32];
                    value.copy_from_slice(&data[cursor..cursor + 32]);
                    node.values[slot] = Some(value);
                    cursor += 32;
                }
            }
            if cursor != data.len() {
                return Err(corrupt("leaf body longer than bitmap"));
            }
            Ok(VerkleNode::Leaf(node))
        }
        _ => Err(corrupt("unknown verkle node tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem_of(byte: u8) -> Stem {
        [byte; STEM_LENGTH]
    }

    #[test]
    fn test_leaf_digest_changes_with_slot_and_value() {
        let mut leaf = LeafNode::new(stem_of(1));
        leaf.values[1] = Some([7u8; 32]);
        let a = leaf.compute_digest();

        leaf.values[1] = Some([8u8; 32]);
        let b = leaf.compute_digest();
        assert_ne!(a, b);

        leaf.values[1] = None;
        leaf.values[2] = Some([7u8; 32]);
        let c = leaf.compute_digest();
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_digest_propagates() {
        let mut node = VerkleNode::Internal(InternalNode::new());
        assert_eq!(node.calc_commitment(), EMPTY_COMMIT_DIGEST);
    }

    #[test]
    fn test_internal_commitment_binds_children() {
        let mut leaf = LeafNode::new(stem_of(3));
        leaf.values[0] = Some([1u8; 32]);

        let mut a = InternalNode::new();
        a.children[3] = VerkleNode::Leaf(leaf.clone());
        let mut b = InternalNode::new();
        b.children[4] = VerkleNode::Leaf(leaf);

        let da = VerkleNode::Internal(a).calc_commitment();
        let db = VerkleNode::Internal(b).calc_commitment();
        assert_ne!(da, db);
    }

    #[test]
    fn test_leaf_record_roundtrip() {
        let mut leaf = LeafNode::new(stem_of(9));
        leaf.values[0] = Some([1u8; 32]);
        leaf.values[200] = Some([2u8; 32]);
        let mut node = VerkleNode::Leaf(leaf);
        node.calc_commitment();

        let bytes = encode_verkle_node(&node).unwrap();
        let decoded = decode_verkle_node(&bytes, &[]).unwrap();
        match decoded {
            VerkleNode::Leaf(l) => {
                assert_eq!(l.stem, stem_of(9));
                assert_eq!(l.values[0], Some([1u8; 32]));
                assert_eq!(l.values[200], Some([2u8; 32]));
                assert_eq!(l.values[5], None);
                assert_eq!(l.digest, node.digest());
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn test_internal_record_roundtrip_builds_references() {
        let mut leaf = LeafNode::new(stem_of(2));
        leaf.values[0] = Some([5u8; 32]);
        let mut internal = InternalNode::new();
        internal.children[2] = VerkleNode::Leaf(leaf);
        let mut node = VerkleNode::Internal(internal);
        node.calc_commitment();

        let bytes = encode_verkle_node(&node).unwrap();
        let decoded = decode_verkle_node(&bytes, &[7]).unwrap();
        match decoded {
            VerkleNode::Internal(n) => match &n.children[2] {
                VerkleNode::Unresolved(r) => {
                    assert_eq!(r.path, vec![7, 2]);
                    assert_ne!(r.digest, EMPTY_COMMIT_DIGEST);
                }
                other => panic!("expected reference, got {other:?}"),
            },
            other => panic!("expected internal, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_records_rejected() {
        assert!(decode_verkle_node(&[], &[]).is_err());
        assert!(decode_verkle_node(&[9, 1, 2], &[]).is_err());
        assert!(decode_verkle_node(&[TAG_INTERNAL, 0, 0], &[]).is_err());
    }
}
