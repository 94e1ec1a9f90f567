//! # WMPT Wire Codec
//!
//! Tag-discriminated binary records for persisted nodes and proof framing.
//! Tags, not field positions, discriminate variants, so new node kinds can
//! be added without breaking old readers.
//!
//! Branch child references come in two forms and readers accept both:
//!
//! - 40 bytes: `hash ‖ weight_be64`
//! - long form for short children: `hash ‖ weight_be64 ‖ child_hash ‖
//!   key_nibbles`, letting a reader rebuild the short envelope without a
//!   storage fetch.

use crate::domain::errors::TrieError;
use crate::domain::hashing::{Hash, HASH_LENGTH};
use crate::domain::wmpt::node::{BranchNode, HashRefNode, Node, ShortNode, ValueNode, BRANCH_WIDTH};

pub const TAG_BRANCH: u8 = 10;
pub const TAG_VALUE: u8 = 11;
pub const TAG_SHORT: u8 = 12;
pub const TAG_NIL: u8 = 13;
pub const TAG_HASH_REF: u8 = 14;

/// `hash ‖ weight_be64`
const REF_LENGTH: usize = HASH_LENGTH + 8;
/// `hash ‖ weight_be64 ‖ child_hash ‖ key` with at least one key nibble.
const LONG_REF_MIN_LENGTH: usize = REF_LENGTH + HASH_LENGTH + 1;

// =============================================================================
// ENCODING
// =============================================================================

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Reference to a child as stored inside a parent record. The child's hash
/// must be current, so only clean nodes may be referenced.
fn encode_child_ref(child: &Node) -> Vec<u8> {
    debug_assert!(!child.dirty());
    match child {
        Node::Nil => Vec::new(),
        Node::Short(s) => {
            let mut out = Vec::with_capacity(LONG_REF_MIN_LENGTH + s.key.len());
            out.extend_from_slice(&s.hash);
            out.extend_from_slice(&s.weight().to_be_bytes());
            out.extend_from_slice(&s.child.hash());
            out.extend_from_slice(&s.key);
            out
        }
        other => {
            let mut out = Vec::with_capacity(REF_LENGTH);
            out.extend_from_slice(&other.hash());
            out.extend_from_slice(&other.weight().to_be_bytes());
            out
        }
    }
}

/// Serialize one node into its tagged record. Hashes must be current.
pub fn encode_node(node: &Node) -> Vec<u8> {
    debug_assert!(!node.dirty());
    match node {
        Node::Nil => vec![TAG_NIL],
        Node::Value(v) => {
            let mut out = Vec::with_capacity(1 + 8 + HASH_LENGTH + 4 + v.value.len());
            out.push(TAG_VALUE);
            out.extend_from_slice(&v.weight.to_be_bytes());
            out.extend_from_slice(&v.hash);
            put_bytes(&mut out, &v.value);
            out
        }
        Node::Short(s) => {
            let mut out = Vec::with_capacity(1 + HASH_LENGTH + 4 + s.key.len() + 4 + REF_LENGTH);
            out.push(TAG_SHORT);
            out.extend_from_slice(&s.hash);
            put_bytes(&mut out, &s.key);
            let mut child_ref = Vec::with_capacity(REF_LENGTH);
            child_ref.extend_from_slice(&s.child.hash());
            child_ref.extend_from_slice(&s.child.weight().to_be_bytes());
            put_bytes(&mut out, &child_ref);
            out
        }
        Node::Branch(b) => {
            let mut out = Vec::with_capacity(1 + HASH_LENGTH + BRANCH_WIDTH * (4 + REF_LENGTH));
            out.push(TAG_BRANCH);
            out.extend_from_slice(&b.hash);
            for child in b.children.iter() {
                put_bytes(&mut out, &encode_child_ref(child));
            }
            out
        }
        Node::HashRef(h) => {
            let mut out = Vec::with_capacity(1 + HASH_LENGTH + 8);
            out.push(TAG_HASH_REF);
            out.extend_from_slice(&h.hash);
            out.extend_from_slice(&h.weight.to_be_bytes());
            out
        }
    }
}

// =============================================================================
// DECODING
// =============================================================================

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TrieError> {
        if self.pos + n > self.data.len() {
            return Err(TrieError::ProofMalformed("truncated record".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TrieError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, TrieError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, TrieError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    fn hash(&mut self) -> Result<Hash, TrieError> {
        let bytes = self.take(HASH_LENGTH)?;
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn var_bytes(&mut self) -> Result<&'a [u8], TrieError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn finished(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Rebuild a child node from its in-parent reference bytes.
fn decode_child_ref(bytes: &[u8]) -> Result<Node, TrieError> {
    if bytes.is_empty() {
        return Ok(Node::Nil);
    }
    if bytes.len() == REF_LENGTH {
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(&bytes[..HASH_LENGTH]);
        let mut wbuf = [0u8; 8];
        wbuf.copy_from_slice(&bytes[HASH_LENGTH..]);
        return Ok(Node::hash_ref(hash, u64::from_be_bytes(wbuf)));
    }
    if bytes.len() >= LONG_REF_MIN_LENGTH {
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(&bytes[..HASH_LENGTH]);
        let mut wbuf = [0u8; 8];
        wbuf.copy_from_slice(&bytes[HASH_LENGTH..REF_LENGTH]);
        let weight = u64::from_be_bytes(wbuf);
        let mut child_hash = [0u8; HASH_LENGTH];
        child_hash.copy_from_slice(&bytes[REF_LENGTH..REF_LENGTH + HASH_LENGTH]);
        let key = bytes[REF_LENGTH + HASH_LENGTH..].to_vec();
        return Ok(Node::Short(ShortNode {
            hash,
            key,
            child: Box::new(Node::hash_ref(child_hash, weight)),
            dirty: false,
            to_collect: false,
        }));
    }
    Err(TrieError::ProofMalformed(format!(
        "bad child reference length {}",
        bytes.len()
    )))
}

/// Decode one tagged node record.
pub fn decode_node(data: &[u8]) -> Result<Node, TrieError> {
    let mut r = Reader::new(data);
    let tag = r.u8()?;
    let node = match tag {
        TAG_NIL => Node::Nil,
        TAG_VALUE => {
            let weight = r.u64()?;
            let hash = r.hash()?;
            let value = r.var_bytes()?.to_vec();
            Node::Value(ValueNode {
                hash,
                value,
                weight,
                dirty: false,
            })
        }
        TAG_SHORT => {
            let hash = r.hash()?;
            let key = r.var_bytes()?.to_vec();
            if key.is_empty() {
                return Err(TrieError::ProofMalformed("short node with empty key".into()));
            }
            let child = decode_child_ref(r.var_bytes()?)?;
            if matches!(child, Node::Nil | Node::Short(_)) {
                return Err(TrieError::ProofMalformed("bad short child reference".into()));
            }
            Node::Short(ShortNode {
                hash,
                key,
                child: Box::new(child),
                dirty: false,
                to_collect: false,
            })
        }
        TAG_BRANCH => {
            let hash = r.hash()?;
            let mut branch = BranchNode::new();
            branch.hash = hash;
            branch.dirty = false;
            let mut weight = 0u64;
            for slot in branch.children.iter_mut() {
                let child = decode_child_ref(r.var_bytes()?)?;
                weight = weight.saturating_add(child.weight());
                *slot = child;
            }
            branch.weight = weight;
            Node::Branch(Box::new(branch))
        }
        TAG_HASH_REF => {
            let hash = r.hash()?;
            let weight = r.u64()?;
            Node::HashRef(HashRefNode { hash, weight })
        }
        other => {
            return Err(TrieError::ProofMalformed(format!("unknown node tag {other}")));
        }
    };
    if !r.finished() {
        return Err(TrieError::ProofMalformed("trailing bytes after record".into()));
    }
    Ok(node)
}

// =============================================================================
// PROOF FRAMING
// =============================================================================

/// Frame a depth-first list of node records into one proof byte string.
pub fn encode_record_list(records: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = records.iter().map(|r| r.len() + 4).sum();
    let mut out = Vec::with_capacity(4 + total);
    out.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for record in records {
        put_bytes(&mut out, record);
    }
    out
}

/// Split a framed proof back into its node records.
pub fn decode_record_list(data: &[u8]) -> Result<Vec<Vec<u8>>, TrieError> {
    if data.is_empty() {
        return Err(TrieError::ProofMalformed("proof is empty".into()));
    }
    let mut r = Reader::new(data);
    let count = r.u32()? as usize;
    let mut records = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        records.push(r.var_bytes()?.to_vec());
    }
    if !r.finished() {
        return Err(TrieError::ProofMalformed("trailing bytes after records".into()));
    }
    Ok(records)
}
