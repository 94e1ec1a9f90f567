//! # Multi-Key Path Proofs
//!
//! `get_path` marks every node visited while walking a set of keys, then
//! collects the marked skeleton depth-first: unmarked subtrees are demoted
//! to hash-refs, everything else is serialized in full. Deserialization
//! rebuilds the partial tree and validates every parent-child hash link.
//!
//! Large key sets fan out across the top-level branch's 16 children on a
//! bounded worker pool; each worker owns its child subtree exclusively, so
//! the marking order cannot race and does not affect the proof.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::TrieError;
use crate::domain::hashing::{raw_hash, Hash};
use crate::domain::nibbles::key_to_nibbles;
use crate::domain::wmpt::codec::{decode_node, decode_record_list, encode_node, encode_record_list};
use crate::domain::wmpt::node::{Node, BRANCH_WIDTH};
use crate::domain::wmpt::trie::{resolve, trie_pool, WeightedMerkleTrie, EXTERNAL_KEY_LENGTH};
use crate::ports::database::StorageAdapter;
use rayon::prelude::*;
use std::mem;
use std::sync::Arc;

/// Key sets larger than this fan out across the top-level children.
const PARALLEL_KEY_THRESHOLD: usize = 10;

impl WeightedMerkleTrie {
    /// Build a path proof covering every key in `keys` (32-byte external
    /// form). Keys absent from the tree simply contribute the path that
    /// proves their absence.
    pub fn get_path(&mut self, keys: &[Vec<u8>], cancel: &CancelToken) -> Result<Vec<u8>, TrieError> {
        for key in keys {
            if key.len() != EXTERNAL_KEY_LENGTH {
                return Err(TrieError::InvalidKey {
                    expected: EXTERNAL_KEY_LENGTH,
                    actual: key.len(),
                });
            }
        }
        let nibble_keys: Vec<Vec<u8>> = keys.iter().map(|k| key_to_nibbles(k)).collect();
        self.get_path_nibbles(&nibble_keys, cancel)
    }

    /// Nibble-key form of `get_path`.
    pub fn get_path_nibbles(
        &mut self,
        keys: &[Vec<u8>],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TrieError> {
        // A persisted root is materialized first so markers have somewhere
        // to live.
        if let Node::HashRef(h) = &self.root {
            self.root = resolve(&self.db, h)?;
        }

        let result = self.mark_and_collect(keys, cancel);
        self.root.clear_collect_marks();
        result
    }

    fn mark_and_collect(
        &mut self,
        keys: &[Vec<u8>],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TrieError> {
        let db = Arc::clone(&self.db);
        let mut root = mem::take(&mut self.root);

        let marked = if keys.len() > PARALLEL_KEY_THRESHOLD && matches!(root, Node::Branch(_)) {
            mark_parallel(&db, root, keys, cancel)
        } else {
            let mut current = root;
            let mut failed = None;
            for key in keys {
                if cancel.is_cancelled() {
                    failed = Some(TrieError::Cancelled);
                    break;
                }
                match mark(&db, current, key) {
                    Ok(next) => current = next,
                    Err((err, original)) => {
                        current = original;
                        failed = Some(err);
                        break;
                    }
                }
            }
            match failed {
                Some(err) => Err((err, current)),
                None => Ok(current),
            }
        };

        root = match marked {
            Ok(node) => node,
            Err((err, node)) => {
                self.root = node;
                return Err(err);
            }
        };
        root.calc_hash();
        self.root = root;

        let mut records = Vec::new();
        collect(&self.root, &mut records, cancel)?;
        Ok(encode_record_list(&records))
    }

    /// Reconstruct a partial tree from a path proof, validating every
    /// parent-child hash link on the way.
    pub fn deserialize(&mut self, proof: &[u8]) -> Result<(), TrieError> {
        let records = decode_record_list(proof)?;
        if records.is_empty() {
            return Ok(());
        }
        let mut index = 0;
        let root = rebuild(&records, &mut index)?;
        if index != records.len() {
            return Err(TrieError::ProofMalformed("unused records in proof".into()));
        }
        self.root = root;
        Ok(())
    }
}

type MarkResult = Result<Node, (TrieError, Node)>;

fn mark_parallel(
    db: &Arc<dyn StorageAdapter>,
    root: Node,
    keys: &[Vec<u8>],
    cancel: &CancelToken,
) -> MarkResult {
    let Node::Branch(mut branch) = root else {
        unreachable!("parallel marking requires a branch root")
    };
    branch.to_collect = true;

    let mut groups: [Vec<&[u8]>; BRANCH_WIDTH] = std::array::from_fn(|_| Vec::new());
    for key in keys {
        if key.is_empty() {
            continue;
        }
        groups[key[0] as usize].push(key.as_slice());
    }

    let children = mem::replace(&mut branch.children, std::array::from_fn(|_| Node::Nil));
    let tasks: Vec<(usize, Node)> = children.into_iter().enumerate().collect();

    let run = |(i, mut child): (usize, Node)| -> (usize, MarkResult) {
        for key in &groups[i] {
            if cancel.is_cancelled() {
                return (i, Err((TrieError::Cancelled, child)));
            }
            match mark(db, child, &key[1..]) {
                Ok(next) => child = next,
                Err(failure) => return (i, Err(failure)),
            }
        }
        (i, Ok(child))
    };

    let results: Vec<(usize, MarkResult)> = match trie_pool() {
        Some(pool) => pool.install(|| tasks.into_par_iter().map(run).collect()),
        None => tasks.into_iter().map(run).collect(),
    };

    let mut first_error = None;
    for (i, outcome) in results {
        match outcome {
            Ok(node) => branch.children[i] = node,
            Err((err, node)) => {
                branch.children[i] = node;
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    let node = Node::Branch(branch);
    match first_error {
        Some(err) => Err((err, node)),
        None => Ok(node),
    }
}

/// Mark the path of one key, materializing hash-refs along the way so the
/// markers persist in the tree. A key that exits the tree early is simply
/// covered by the nodes already marked.
fn mark(db: &Arc<dyn StorageAdapter>, node: Node, key: &[u8]) -> MarkResult {
    match node {
        Node::Branch(mut b) => {
            b.to_collect = true;
            if key.is_empty() {
                return Ok(Node::Branch(b));
            }
            let idx = key[0] as usize;
            let child = mem::take(&mut b.children[idx]);
            match mark(db, child, &key[1..]) {
                Ok(next) => {
                    b.children[idx] = next;
                    Ok(Node::Branch(b))
                }
                Err((err, original)) => {
                    b.children[idx] = original;
                    Err((err, Node::Branch(b)))
                }
            }
        }
        Node::Short(mut s) => {
            s.to_collect = true;
            let p = crate::domain::nibbles::common_prefix_len(&s.key, key);
            if p != s.key.len() {
                // Key diverges inside the prefix: the short itself proves
                // the absence.
                return Ok(Node::Short(s));
            }
            let child = mem::take(&mut *s.child);
            match mark(db, child, &key[p..]) {
                Ok(next) => {
                    *s.child = next;
                    Ok(Node::Short(s))
                }
                Err((err, original)) => {
                    *s.child = original;
                    Err((err, Node::Short(s)))
                }
            }
        }
        Node::HashRef(h) => match resolve(db, &h) {
            Ok(loaded) => mark(db, loaded, key),
            Err(err) => Err((err, Node::HashRef(h))),
        },
        leaf => Ok(leaf),
    }
}

/// Depth-first collection: an unmarked branch or short is demoted to a
/// hash-ref record; everything else is serialized in full.
fn collect(node: &Node, records: &mut Vec<Vec<u8>>, cancel: &CancelToken) -> Result<(), TrieError> {
    if cancel.is_cancelled() {
        return Err(TrieError::Cancelled);
    }
    if !node.to_collect() {
        let demoted = Node::hash_ref(node.hash(), node.weight());
        records.push(encode_node(&demoted));
        return Ok(());
    }
    records.push(encode_node(node));
    match node {
        Node::Branch(b) => {
            for child in b.children.iter() {
                collect(child, records, cancel)?;
            }
        }
        Node::Short(s) => collect(&s.child, records, cancel)?,
        _ => {}
    }
    Ok(())
}

/// Rebuild one subtree from the record stream. Every branch, short and
/// value hash is recomputed from the reconstructed children, so a record
/// whose stored digest lies about its content is rejected; only hash-ref
/// leaves are taken at face value, and they feed their parent's recompute.
fn rebuild(records: &[Vec<u8>], index: &mut usize) -> Result<Node, TrieError> {
    if *index >= records.len() {
        return Err(TrieError::ProofMalformed("proof ended mid-tree".into()));
    }
    let mut node = decode_node(&records[*index])?;
    *index += 1;
    let stored = node.hash();

    match &mut node {
        Node::Branch(b) => {
            for slot in 0..BRANCH_WIDTH {
                let expected = match &b.children[slot] {
                    Node::Nil => None,
                    child => Some(child.hash()),
                };
                let sub = rebuild(records, index)?;
                match (expected, sub.is_nil()) {
                    (None, true) => {}
                    (None, false) | (Some(_), true) => {
                        return Err(TrieError::ProofMalformed(
                            "child record does not match branch occupancy".into(),
                        ));
                    }
                    (Some(expected), false) => {
                        check_hash(expected, sub.hash())?;
                        // A bare hash-ref adds nothing over the in-record
                        // reference, which may carry a short envelope.
                        if !matches!(sub, Node::HashRef(_)) {
                            b.children[slot] = sub;
                        } else if let Node::Short(kept) = &b.children[slot] {
                            // A kept envelope must still hash honestly.
                            let mut m = kept.key.clone();
                            m.extend_from_slice(&kept.child.hash());
                            check_hash(kept.hash, raw_hash(&m))?;
                        }
                    }
                }
            }
            b.dirty = true;
        }
        Node::Short(s) => {
            let expected = s.child.hash();
            let sub = rebuild(records, index)?;
            if sub.is_nil() {
                return Err(TrieError::ProofMalformed("short child missing".into()));
            }
            check_hash(expected, sub.hash())?;
            if !matches!(sub, Node::HashRef(_)) {
                s.child = Box::new(sub);
            }
            s.dirty = true;
        }
        Node::Value(v) => {
            v.dirty = true;
        }
        // Reference leaves recompute to their stored digest trivially.
        Node::Nil | Node::HashRef(_) => {}
    }

    let computed = node.calc_hash();
    check_hash(stored, computed)?;
    Ok(node)
}

fn check_hash(expected: Hash, actual: Hash) -> Result<(), TrieError> {
    if expected != actual {
        return Err(TrieError::HashMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}
