//! # Fixed-Length Hex-Key Merkle Trie
//!
//! In-memory weighted 16-ary trie for small fixed-schema state maps. Keys
//! are hex-ASCII byte strings (every input byte is a hex digit character)
//! and all keys share one length, so only routing and value nodes exist,
//! with no mixed nodes.
//!
//! This trie never persists; the weighted Patricia trie in `wmpt` is the
//! persistent structure.

use crate::domain::errors::TrieError;
use crate::domain::hashing::{empty_state_hash, raw_hash, Hash};

/// Map a hex-ASCII digit to its child slot.
fn hex_index(digit: u8) -> Result<usize, TrieError> {
    match digit {
        b'0'..=b'9' => Ok((digit - b'0') as usize),
        b'a'..=b'f' => Ok((digit - b'a' + 10) as usize),
        b'A'..=b'F' => Ok((digit - b'A' + 10) as usize),
        other => Err(TrieError::InvalidHexDigit(other)),
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Weight as a decimal string, the prefix of every node hash in this trie.
fn weight_prefix(weight: u64) -> Vec<u8> {
    weight.to_string().into_bytes()
}

#[derive(Clone, Debug)]
enum HexNode {
    Nil,
    Value {
        key: Vec<u8>,
        hash: Hash,
        value: Vec<u8>,
        weight: u64,
    },
    Routing {
        key: Vec<u8>,
        hash: Hash,
        children: Box<[HexNode; 16]>,
        weight: u64,
    },
}

impl HexNode {
    fn is_nil(&self) -> bool {
        matches!(self, HexNode::Nil)
    }

    fn key(&self) -> &[u8] {
        match self {
            HexNode::Nil => &[],
            HexNode::Value { key, .. } | HexNode::Routing { key, .. } => key,
        }
    }

    fn weight(&self) -> u64 {
        match self {
            HexNode::Nil => 0,
            HexNode::Value { weight, .. } | HexNode::Routing { weight, .. } => *weight,
        }
    }

    fn hash(&self) -> Hash {
        match self {
            HexNode::Nil => empty_state_hash(),
            HexNode::Value { hash, .. } | HexNode::Routing { hash, .. } => *hash,
        }
    }

    /// Recompute this node's hash from its weight and content.
    fn calc_hash(&mut self) {
        match self {
            HexNode::Nil => {}
            HexNode::Value {
                hash, value, weight, ..
            } => {
                let mut m = weight_prefix(*weight);
                m.extend_from_slice(value);
                *hash = raw_hash(&m);
            }
            HexNode::Routing {
                hash,
                children,
                weight,
                ..
            } => {
                let mut m = weight_prefix(*weight);
                for child in children.iter() {
                    if !child.is_nil() {
                        m.extend_from_slice(&child.hash());
                    }
                }
                *hash = raw_hash(&m);
            }
        }
    }
}

fn empty_children() -> Box<[HexNode; 16]> {
    Box::new(std::array::from_fn(|_| HexNode::Nil))
}

/// Weighted Merkle trie over fixed-length hex-ASCII keys.
#[derive(Clone, Debug)]
pub struct HexKeyTrie {
    root: HexNode,
}

impl Default for HexKeyTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl HexKeyTrie {
    pub fn new() -> Self {
        Self { root: HexNode::Nil }
    }

    /// Root hash; the empty trie hashes to the empty-state digest.
    pub fn root_hash(&self) -> Hash {
        self.root.hash()
    }

    /// Total weight of all stored values.
    pub fn weight(&self) -> u64 {
        self.root.weight()
    }

    /// Look up a value by its full hex key.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        find(&self.root, key)
    }

    /// Insert a new value or replace an existing one, keeping subtree
    /// weights consistent along the way.
    pub fn insert_or_update(
        &mut self,
        key: &[u8],
        weight: u64,
        value: Vec<u8>,
    ) -> Result<(), TrieError> {
        // Validate every digit up front so a bad key cannot mutate the tree.
        for &b in key {
            hex_index(b)?;
        }
        let root = std::mem::replace(&mut self.root, HexNode::Nil);
        let (_, new_root) = insert(root, key, weight, value)?;
        self.root = new_root;
        Ok(())
    }

    /// Remove a key and return the weight it carried.
    pub fn delete(&mut self, key: &[u8]) -> Result<u64, TrieError> {
        for &b in key {
            hex_index(b)?;
        }
        let root = std::mem::replace(&mut self.root, HexNode::Nil);
        match delete(root, key) {
            Ok((removed, new_root)) => {
                self.root = new_root;
                Ok(removed)
            }
            Err((err, old_root)) => {
                self.root = old_root;
                Err(err)
            }
        }
    }

    /// Value of the leaf owning cumulative-weight index `number`, visiting
    /// children in slot order.
    pub fn floor_value(&self, number: u64) -> Result<&[u8], TrieError> {
        let total = self.root.weight();
        if number >= total {
            return Err(TrieError::WeightOutOfRange {
                weight: number,
                total,
            });
        }
        floor_node(&self.root, number).ok_or(TrieError::KeyNotFound)
    }

    /// All values, depth-first in slot order.
    pub fn values(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        aggregate(&self.root, &mut out, &|n| match n {
            HexNode::Value { value, .. } => Some(value.clone()),
            _ => None,
        });
        out
    }

    /// Weights of every routing and value node, depth-first in slot order.
    pub fn weights(&self) -> Vec<u64> {
        let mut out = Vec::new();
        aggregate(&self.root, &mut out, &|n| match n {
            HexNode::Nil => None,
            other => Some(other.weight()),
        });
        out
    }

    /// Hashes of every routing and value node, depth-first in slot order.
    pub fn hashes(&self) -> Vec<Hash> {
        let mut out = Vec::new();
        aggregate(&self.root, &mut out, &|n| match n {
            HexNode::Nil => None,
            other => Some(other.hash()),
        });
        out
    }
}

fn find<'a>(node: &'a HexNode, key: &[u8]) -> Option<&'a [u8]> {
    match node {
        HexNode::Nil => None,
        HexNode::Value { key: node_key, value, .. } => {
            if node_key.as_slice() == key {
                Some(value)
            } else {
                None
            }
        }
        HexNode::Routing { key: node_key, children, .. } => {
            let p = common_prefix(node_key, key);
            if p != node_key.len() || p == key.len() {
                return None;
            }
            let postfix = &key[p..];
            let idx = hex_index(postfix[0]).ok()?;
            find(&children[idx], postfix)
        }
    }
}

/// Recursive insert; returns the signed weight change and the replacement
/// node. Child keys keep their leading digit so lookups can re-index.
fn insert(node: HexNode, key: &[u8], weight: u64, value: Vec<u8>) -> Result<(i64, HexNode), TrieError> {
    match node {
        HexNode::Nil => {
            let mut leaf = HexNode::Value {
                key: key.to_vec(),
                hash: empty_state_hash(),
                value,
                weight,
            };
            leaf.calc_hash();
            Ok((weight as i64, leaf))
        }
        HexNode::Routing {
            key: node_key,
            mut children,
            weight: node_weight,
            hash,
        } => {
            let p = common_prefix(&node_key, key);
            if p != node_key.len() {
                // The key diverges inside this routing node's own prefix:
                // split into two routing nodes at the divergence point.
                let idx_old = hex_index(node_key[p])?;
                let idx_new = hex_index(key[p])?;
                let mut old_routing = HexNode::Routing {
                    key: node_key[p..].to_vec(),
                    hash,
                    children,
                    weight: node_weight,
                };
                old_routing.calc_hash();

                let mut new_leaf = HexNode::Value {
                    key: key[p..].to_vec(),
                    hash: empty_state_hash(),
                    value,
                    weight,
                };
                new_leaf.calc_hash();

                let mut split_children = empty_children();
                split_children[idx_old] = old_routing;
                split_children[idx_new] = new_leaf;
                let mut routing = HexNode::Routing {
                    key: node_key[..p].to_vec(),
                    hash: empty_state_hash(),
                    children: split_children,
                    weight: node_weight + weight,
                };
                routing.calc_hash();
                return Ok((weight as i64, routing));
            }
            let postfix = &key[p..];
            let idx = hex_index(postfix[0])?;
            let child = std::mem::replace(&mut children[idx], HexNode::Nil);
            let (change, new_child) = insert(child, postfix, weight, value)?;
            children[idx] = new_child;
            let mut routing = HexNode::Routing {
                key: node_key,
                hash: empty_state_hash(),
                children,
                weight: (node_weight as i64 + change) as u64,
            };
            routing.calc_hash();
            Ok((change, routing))
        }
        HexNode::Value {
            key: node_key,
            value: node_value,
            weight: node_weight,
            ..
        } => {
            if node_key.as_slice() == key {
                // Exact match: replace in place.
                let change = weight as i64 - node_weight as i64;
                let mut leaf = HexNode::Value {
                    key: node_key,
                    hash: empty_state_hash(),
                    value,
                    weight,
                };
                leaf.calc_hash();
                Ok((change, leaf))
            } else {
                // Split: a routing node over the shared prefix with the old
                // and new leaves hung at their diverging digits.
                let p = common_prefix(&node_key, key);
                let postfix_new = &key[p..];
                let postfix_old = &node_key[p..];
                let idx_new = hex_index(postfix_new[0])?;
                let idx_old = hex_index(postfix_old[0])?;

                let mut new_leaf = HexNode::Value {
                    key: postfix_new.to_vec(),
                    hash: empty_state_hash(),
                    value,
                    weight,
                };
                new_leaf.calc_hash();

                let mut old_leaf = HexNode::Value {
                    key: postfix_old.to_vec(),
                    hash: empty_state_hash(),
                    value: node_value,
                    weight: node_weight,
                };
                old_leaf.calc_hash();

                let mut children = empty_children();
                children[idx_new] = new_leaf;
                children[idx_old] = old_leaf;
                let mut routing = HexNode::Routing {
                    key: node_key[..p].to_vec(),
                    hash: empty_state_hash(),
                    children,
                    weight: node_weight + weight,
                };
                routing.calc_hash();
                Ok((weight as i64, routing))
            }
        }
    }
}

/// Recursive delete; on error the untouched node comes back so the caller
/// can restore it.
#[allow(clippy::result_large_err)]
fn delete(node: HexNode, key: &[u8]) -> Result<(u64, HexNode), (TrieError, HexNode)> {
    match node {
        HexNode::Nil => Err((TrieError::KeyNotFound, HexNode::Nil)),
        HexNode::Value {
            key: ref node_key, ..
        } => {
            if node_key.as_slice() == key {
                Ok((node.weight(), HexNode::Nil))
            } else {
                Err((TrieError::KeyNotFound, node))
            }
        }
        HexNode::Routing {
            key: node_key,
            mut children,
            weight: node_weight,
            hash,
        } => {
            let p = common_prefix(&node_key, key);
            if p != node_key.len() || p == key.len() {
                return Err((
                    TrieError::KeyNotFound,
                    HexNode::Routing {
                        key: node_key,
                        children,
                        weight: node_weight,
                        hash,
                    },
                ));
            }
            let postfix = &key[p..];
            let idx = match hex_index(postfix[0]) {
                Ok(i) => i,
                Err(e) => {
                    return Err((
                        e,
                        HexNode::Routing {
                            key: node_key,
                            children,
                            weight: node_weight,
                            hash,
                        },
                    ))
                }
            };
            let child = std::mem::replace(&mut children[idx], HexNode::Nil);
            match delete(child, postfix) {
                Ok((removed, new_child)) => {
                    children[idx] = new_child;
                    if children.iter().all(HexNode::is_nil) {
                        return Ok((removed, HexNode::Nil));
                    }
                    let mut routing = HexNode::Routing {
                        key: node_key,
                        hash: empty_state_hash(),
                        children,
                        weight: node_weight - removed,
                    };
                    routing.calc_hash();
                    Ok((removed, routing))
                }
                Err((err, old_child)) => {
                    children[idx] = old_child;
                    Err((
                        err,
                        HexNode::Routing {
                            key: node_key,
                            children,
                            weight: node_weight,
                            hash,
                        },
                    ))
                }
            }
        }
    }
}

fn floor_node(node: &HexNode, mut number: u64) -> Option<&[u8]> {
    match node {
        HexNode::Nil => None,
        HexNode::Value { value, .. } => Some(value),
        HexNode::Routing { children, .. } => {
            for child in children.iter() {
                if child.is_nil() {
                    continue;
                }
                if number < child.weight() {
                    return floor_node(child, number);
                }
                number -= child.weight();
            }
            None
        }
    }
}

fn aggregate<T>(node: &HexNode, out: &mut Vec<T>, pick: &dyn Fn(&HexNode) -> Option<T>) {
    match node {
        HexNode::Nil => {}
        HexNode::Value { .. } => {
            if let Some(item) = pick(node) {
                out.push(item);
            }
        }
        HexNode::Routing { children, .. } => {
            if let Some(item) = pick(node) {
                out.push(item);
            }
            for child in children.iter() {
                aggregate(child, out, pick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trie() -> HexKeyTrie {
        let mut trie = HexKeyTrie::new();
        trie.insert_or_update(b"00000", 10, b"hello".to_vec()).unwrap();
        trie.insert_or_update(b"00200", 9, b"hi".to_vec()).unwrap();
        trie.insert_or_update(b"00300", 8, b"hello".to_vec()).unwrap();
        trie.insert_or_update(b"00220", 7, b"hello".to_vec()).unwrap();
        trie
    }

    #[test]
    fn test_empty_trie() {
        let trie = HexKeyTrie::new();
        assert_eq!(trie.root_hash(), empty_state_hash());
        assert_eq!(trie.weight(), 0);
        assert!(trie.get(b"00").is_none());
    }

    #[test]
    fn test_insert_get_update() {
        let mut trie = sample_trie();
        assert_eq!(trie.weight(), 34);
        assert_eq!(trie.get(b"00200"), Some(&b"hi"[..]));
        assert_eq!(trie.get(b"00220"), Some(&b"hello"[..]));
        assert!(trie.get(b"00201").is_none());

        // Replace the first key with a lighter value.
        trie.insert_or_update(b"00000", 6, b"hi".to_vec()).unwrap();
        assert_eq!(trie.weight(), 30);
        assert_eq!(trie.get(b"00000"), Some(&b"hi"[..]));
    }

    #[test]
    fn test_insertion_order_does_not_change_root() {
        let mut a = HexKeyTrie::new();
        a.insert_or_update(b"0a", 1, b"x".to_vec()).unwrap();
        a.insert_or_update(b"0b", 2, b"y".to_vec()).unwrap();
        a.insert_or_update(b"1c", 3, b"z".to_vec()).unwrap();

        let mut b = HexKeyTrie::new();
        b.insert_or_update(b"1c", 3, b"z".to_vec()).unwrap();
        b.insert_or_update(b"0a", 1, b"x".to_vec()).unwrap();
        b.insert_or_update(b"0b", 2, b"y".to_vec()).unwrap();

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn test_delete_restores_weight() {
        let mut trie = sample_trie();
        let removed = trie.delete(b"00220").unwrap();
        assert_eq!(removed, 7);
        assert_eq!(trie.weight(), 27);
        assert!(trie.get(b"00220").is_none());
        assert_eq!(trie.delete(b"00220"), Err(TrieError::KeyNotFound));
    }

    #[test]
    fn test_delete_last_key_empties_trie() {
        let mut trie = HexKeyTrie::new();
        trie.insert_or_update(b"ab", 5, b"v".to_vec()).unwrap();
        trie.delete(b"ab").unwrap();
        assert_eq!(trie.root_hash(), empty_state_hash());
        assert_eq!(trie.weight(), 0);
    }

    #[test]
    fn test_floor_value_weight_partition() {
        let trie = sample_trie();
        // Slot order: 00000 (10), 00200 (9), 00220 (7), 00300 (8).
        assert_eq!(trie.floor_value(0).unwrap(), b"hello");
        assert_eq!(trie.floor_value(9).unwrap(), b"hello");
        assert_eq!(trie.floor_value(10).unwrap(), b"hi");
        assert_eq!(trie.floor_value(19).unwrap(), b"hello"); // 00220
        assert_eq!(trie.floor_value(26).unwrap(), b"hello"); // 00300
        assert_eq!(trie.floor_value(33).unwrap(), b"hello");
        assert!(matches!(
            trie.floor_value(34),
            Err(TrieError::WeightOutOfRange { .. })
        ));
    }

    #[test]
    fn test_aggregations_walk_slot_order() {
        let trie = sample_trie();
        assert_eq!(
            trie.values(),
            vec![
                b"hello".to_vec(),
                b"hi".to_vec(),
                b"hello".to_vec(),
                b"hello".to_vec()
            ]
        );
        // Routing weights interleave with leaf weights on the walk.
        let weights = trie.weights();
        assert_eq!(*weights.first().unwrap(), 34);
        assert_eq!(trie.hashes().len(), weights.len());
    }

    #[test]
    fn test_invalid_hex_digit_rejected() {
        let mut trie = HexKeyTrie::new();
        assert!(matches!(
            trie.insert_or_update(b"0g", 1, b"v".to_vec()),
            Err(TrieError::InvalidHexDigit(b'g'))
        ));
        assert_eq!(trie.weight(), 0);
    }

    #[test]
    fn test_routing_prefix_split() {
        let mut trie = HexKeyTrie::new();
        trie.insert_or_update(b"aab", 1, b"x".to_vec()).unwrap();
        trie.insert_or_update(b"aac", 2, b"y".to_vec()).unwrap();
        // Diverges inside the routing node's "aa" prefix.
        trie.insert_or_update(b"abz", 3, b"z".to_vec()).unwrap();
        assert_eq!(trie.get(b"aab"), Some(&b"x"[..]));
        assert_eq!(trie.get(b"aac"), Some(&b"y"[..]));
        assert_eq!(trie.get(b"abz"), Some(&b"z"[..]));
        assert_eq!(trie.weight(), 6);
    }

    #[test]
    fn test_copy_is_independent() {
        let trie = sample_trie();
        let mut copy = trie.clone();
        copy.delete(b"00000").unwrap();
        assert_eq!(trie.weight(), 34);
        assert_eq!(copy.weight(), 24);
        assert_ne!(trie.root_hash(), copy.root_hash());
    }
}
