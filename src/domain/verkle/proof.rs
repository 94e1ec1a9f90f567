//! # Verkle Multiproofs
//!
//! A multiproof is the deduplicated set of node records along every queried
//! path, plus a state diff listing the pre-value observed for each key.
//! Verification rebuilds the partial tree, recomputes every commitment
//! bottom-up against the trusted root digest, and re-reads each key from
//! the rebuilt tree before comparing it with the claimed diff.
//!
//! Presence verification additionally requires every requested key to
//! carry a value in the diff; absence verification requires every
//! pre-value to be empty.

use crate::domain::errors::VerkleError;
use crate::domain::verkle::committer::{digest_to_scalar, point_to_digest, CommitDigest, EMPTY_COMMIT_DIGEST};
use crate::domain::verkle::committer::committer;
use crate::domain::verkle::node::{decode_verkle_node, encode_verkle_node, VerkleNode};
use crate::domain::verkle::tree_key::{split_tree_key, tree_key_for_file_hash, TreeKey, STEM_LENGTH};
use crate::domain::verkle::trie::VerkleTrie;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One revealed node, addressed by its stem-prefix path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub path: Vec<u8>,
    pub record: Vec<u8>,
}

/// Deduplicated reveal set for a batch of keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerkleProof {
    pub nodes: Vec<ProofNode>,
}

/// Observed pre-state for one queried key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiffEntry {
    pub key: [u8; 32],
    pub pre_value: Option<[u8; 32]>,
}

pub type StateDiff = Vec<StateDiffEntry>;

impl VerkleTrie {
    /// Build a multiproof over a set of raw tree keys.
    pub fn make_proof(&mut self, keys: &[TreeKey]) -> Result<(VerkleProof, StateDiff), VerkleError> {
        self.commit();

        let mut records: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut diff = StateDiff::with_capacity(keys.len());

        for key in keys {
            let (stem, suffix) = split_tree_key(key);
            self.materialize_path(&stem)?;

            let mut node = &self.root;
            let mut depth = 0usize;
            let pre_value = loop {
                match node {
                    VerkleNode::Empty => break None,
                    VerkleNode::Internal(internal) => {
                        records
                            .entry(stem[..depth].to_vec())
                            .or_insert(encode_verkle_node(node)?);
                        node = &internal.children[stem[depth] as usize];
                        depth += 1;
                    }
                    VerkleNode::Leaf(leaf) => {
                        records
                            .entry(stem[..depth].to_vec())
                            .or_insert(encode_verkle_node(node)?);
                        if leaf.stem == stem {
                            break leaf.values[suffix as usize];
                        }
                        break None;
                    }
                    VerkleNode::Unresolved(_) => {
                        // materialize_path resolved this stem's spine.
                        return Err(VerkleError::MissingNode);
                    }
                }
            };
            diff.push(StateDiffEntry {
                key: *key,
                pre_value,
            });
        }

        let nodes = records
            .into_iter()
            .map(|(path, record)| ProofNode { path, record })
            .collect();
        Ok((VerkleProof { nodes }, diff))
    }

    /// Multiproof over the file-root slots of a set of path hashes.
    pub fn make_proof_file_meta(
        &mut self,
        filepath_hashes: &[Vec<u8>],
    ) -> Result<(VerkleProof, StateDiff), VerkleError> {
        let keys: Vec<TreeKey> = filepath_hashes
            .iter()
            .map(|p| tree_key_for_file_hash(p))
            .collect();
        self.make_proof(&keys)
    }
}

/// Verify a multiproof against a trusted root digest: recompute every
/// revealed commitment bottom-up, then re-read each key from the rebuilt
/// partial tree and compare with the claimed diff.
pub fn verify_proof(
    proof: &VerkleProof,
    state_diff: &StateDiff,
    state_root: &CommitDigest,
    keys: &[TreeKey],
) -> Result<(), VerkleError> {
    let bad = |msg: &str| VerkleError::InvalidProof(msg.to_string());

    let mut nodes: BTreeMap<Vec<u8>, VerkleNode> = BTreeMap::new();
    for entry in &proof.nodes {
        let node = decode_verkle_node(&entry.record, &entry.path)?;
        if nodes.insert(entry.path.clone(), node).is_some() {
            return Err(bad("duplicate node path in proof"));
        }
    }

    if *state_root == EMPTY_COMMIT_DIGEST {
        if !nodes.is_empty() {
            return Err(bad("non-empty proof for an empty tree"));
        }
    } else {
        let computed = verified_digest(&nodes, &[])?;
        if computed != *state_root {
            return Err(bad("proof does not match the state root"));
        }
    }

    let diff_by_key: BTreeMap<[u8; 32], Option<[u8; 32]>> = state_diff
        .iter()
        .map(|entry| (entry.key, entry.pre_value))
        .collect();

    for key in keys {
        let claimed = diff_by_key
            .get(key)
            .ok_or_else(|| bad("requested key missing from state diff"))?;
        let observed = read_from_proof(&nodes, key)?;
        if observed != *claimed {
            return Err(bad("state diff disagrees with proof content"));
        }
    }
    Ok(())
}

/// Presence form: on top of structural verification, every requested file
/// slot must carry a value.
pub fn verify_proof_presence_file_meta(
    proof: &VerkleProof,
    state_diff: &StateDiff,
    state_root: &CommitDigest,
    filepath_hashes: &[Vec<u8>],
) -> Result<(), VerkleError> {
    let keys: Vec<TreeKey> = filepath_hashes
        .iter()
        .map(|p| tree_key_for_file_hash(p))
        .collect();
    verify_proof(proof, state_diff, state_root, &keys)?;
    for entry in state_diff {
        if entry.pre_value.is_none() {
            return Err(VerkleError::InvalidProof(
                "expected presence but a pre-value is empty".into(),
            ));
        }
    }
    Ok(())
}

/// Absence form: every pre-value in the diff must be empty.
pub fn verify_proof_absence(
    proof: &VerkleProof,
    state_diff: &StateDiff,
    state_root: &CommitDigest,
    keys: &[TreeKey],
) -> Result<(), VerkleError> {
    verify_proof(proof, state_diff, state_root, keys)?;
    for entry in state_diff {
        if entry.pre_value.is_some() {
            return Err(VerkleError::InvalidProof(
                "expected absence but a pre-value is present".into(),
            ));
        }
    }
    Ok(())
}

/// Recompute the digest of the node at `path` from the reveal set. A child
/// that is itself revealed must recompute to the digest its parent record
/// claims for it.
fn verified_digest(
    nodes: &BTreeMap<Vec<u8>, VerkleNode>,
    path: &[u8],
) -> Result<CommitDigest, VerkleError> {
    let bad = |msg: &str| VerkleError::InvalidProof(msg.to_string());
    let node = nodes.get(path).ok_or_else(|| bad("missing node on path"))?;
    match node {
        VerkleNode::Leaf(leaf) => Ok(leaf.compute_digest()),
        VerkleNode::Internal(internal) => {
            let mut coeffs = Vec::new();
            for (slot, child) in internal.children.iter().enumerate() {
                let recorded = child.digest();
                if recorded == EMPTY_COMMIT_DIGEST {
                    continue;
                }
                let mut child_path = path.to_vec();
                child_path.push(slot as u8);
                if nodes.contains_key(&child_path) {
                    let recomputed = verified_digest(nodes, &child_path)?;
                    if recomputed != recorded {
                        return Err(bad("revealed child disagrees with parent commitment"));
                    }
                }
                coeffs.push((slot, digest_to_scalar(&recorded)));
            }
            Ok(point_to_digest(&committer().commit_sparse(&coeffs)))
        }
        VerkleNode::Empty | VerkleNode::Unresolved(_) => Err(bad("unexpected node kind in proof")),
    }
}

/// Walk the reveal set for one key. Every step of the path must either be
/// revealed or provably vacant.
fn read_from_proof(
    nodes: &BTreeMap<Vec<u8>, VerkleNode>,
    key: &TreeKey,
) -> Result<Option<[u8; 32]>, VerkleError> {
    let bad = |msg: &str| VerkleError::InvalidProof(msg.to_string());
    let (stem, suffix) = split_tree_key(key);

    if nodes.is_empty() {
        return Ok(None);
    }
    let mut depth = 0usize;
    loop {
        let node = nodes
            .get(&stem[..depth].to_vec())
            .ok_or_else(|| bad("key path not covered by proof"))?;
        match node {
            VerkleNode::Internal(internal) => {
                if depth >= STEM_LENGTH {
                    return Err(bad("proof path deeper than a stem"));
                }
                let child = &internal.children[stem[depth] as usize];
                if child.digest() == EMPTY_COMMIT_DIGEST {
                    return Ok(None);
                }
                depth += 1;
            }
            VerkleNode::Leaf(leaf) => {
                if leaf.stem == stem {
                    return Ok(leaf.values[suffix as usize]);
                }
                return Ok(None);
            }
            VerkleNode::Empty | VerkleNode::Unresolved(_) => {
                return Err(bad("unexpected node kind in proof"));
            }
        }
    }
}
