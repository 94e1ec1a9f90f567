//! # Pedersen Vector Committer
//!
//! The commitment scheme under the verkle trie: a fixed set of 256
//! Ristretto generators, one per child slot, with commitments mapped to
//! 32-byte digests by point compression. The generator set is derived
//! deterministically at first use and immutable afterwards.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{Identity, MultiscalarMul};
use sha2::Sha512;
use std::sync::OnceLock;

/// Width of every vector commitment: one coefficient per child slot.
pub const VECTOR_WIDTH: usize = 256;

const GENERATOR_DOMAIN: &[u8] = b"state-store/verkle/generator";

/// A 32-byte commitment digest (compressed group element).
pub type CommitDigest = [u8; 32];

/// Digest of the empty subtree: the identity point compresses to zeroes.
pub const EMPTY_COMMIT_DIGEST: CommitDigest = [0u8; 32];

pub struct Committer {
    generators: Vec<RistrettoPoint>,
}

/// Process-wide committer instance; generators are expensive to derive.
pub fn committer() -> &'static Committer {
    static INSTANCE: OnceLock<Committer> = OnceLock::new();
    INSTANCE.get_or_init(Committer::new)
}

impl Committer {
    fn new() -> Self {
        let generators = (0..VECTOR_WIDTH)
            .map(|i| {
                let mut seed = GENERATOR_DOMAIN.to_vec();
                seed.extend_from_slice(&(i as u32).to_be_bytes());
                RistrettoPoint::hash_from_bytes::<Sha512>(&seed)
            })
            .collect();
        Self { generators }
    }

    /// Commit to a full coefficient vector.
    pub fn commit(&self, values: &[Scalar]) -> RistrettoPoint {
        debug_assert!(values.len() <= VECTOR_WIDTH);
        RistrettoPoint::multiscalar_mul(values.iter(), self.generators[..values.len()].iter())
    }

    /// Commit to a sparse vector given `(slot, coefficient)` pairs.
    pub fn commit_sparse(&self, pairs: &[(usize, Scalar)]) -> RistrettoPoint {
        RistrettoPoint::multiscalar_mul(
            pairs.iter().map(|(_, s)| s),
            pairs.iter().map(|(i, _)| &self.generators[*i]),
        )
    }
}

/// Compress a commitment into its 32-byte digest form.
pub fn point_to_digest(point: &RistrettoPoint) -> CommitDigest {
    point.compress().to_bytes()
}

/// Try to decompress a digest back into a group element.
pub fn digest_to_point(digest: &CommitDigest) -> Option<RistrettoPoint> {
    CompressedRistretto(*digest).decompress()
}

/// Map a child digest into the scalar field so it can serve as a
/// coefficient in the parent's commitment.
pub fn digest_to_scalar(digest: &CommitDigest) -> Scalar {
    Scalar::from_bytes_mod_order(*digest)
}

/// Interpret up to 32 little-endian bytes as a scalar.
pub fn scalar_from_le_bytes(bytes: &[u8]) -> Scalar {
    debug_assert!(bytes.len() <= 32);
    let mut buf = [0u8; 32];
    buf[..bytes.len()].copy_from_slice(bytes);
    Scalar::from_bytes_mod_order(buf)
}

/// Split a 32-byte value into the two low/high scalars used inside leaf
/// commitments. The low half carries a presence marker at bit 128 so a
/// stored zero value is distinguishable from an empty slot.
pub fn value_to_scalar_pair(value: &[u8; 32]) -> (Scalar, Scalar) {
    let mut low = [0u8; 32];
    low[..16].copy_from_slice(&value[..16]);
    low[16] = 1;
    let mut high = [0u8; 32];
    high[..16].copy_from_slice(&value[16..]);
    (
        Scalar::from_bytes_mod_order(low),
        Scalar::from_bytes_mod_order(high),
    )
}

/// The all-empty commitment, used for vacant subtrees.
pub fn identity_point() -> RistrettoPoint {
    RistrettoPoint::identity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_commit_digest_is_identity() {
        assert_eq!(point_to_digest(&identity_point()), EMPTY_COMMIT_DIGEST);
        assert_eq!(point_to_digest(&committer().commit(&[])), EMPTY_COMMIT_DIGEST);
    }

    #[test]
    fn test_commit_is_binding_to_position() {
        let c = committer();
        let one = Scalar::from(1u64);
        let a = c.commit_sparse(&[(0, one)]);
        let b = c.commit_sparse(&[(1, one)]);
        assert_ne!(point_to_digest(&a), point_to_digest(&b));
    }

    #[test]
    fn test_sparse_matches_dense() {
        let c = committer();
        let mut dense = vec![Scalar::from(0u64); 8];
        dense[2] = Scalar::from(7u64);
        dense[5] = Scalar::from(9u64);
        let sparse = c.commit_sparse(&[(2, Scalar::from(7u64)), (5, Scalar::from(9u64))]);
        assert_eq!(point_to_digest(&c.commit(&dense)), point_to_digest(&sparse));
    }

    #[test]
    fn test_value_scalar_pair_marks_presence() {
        let zero = [0u8; 32];
        let (low, _) = value_to_scalar_pair(&zero);
        // A stored all-zero value still differs from an absent slot.
        assert_ne!(low, Scalar::from(0u64));
    }

    #[test]
    fn test_digest_point_roundtrip() {
        let c = committer();
        let point = c.commit_sparse(&[(3, Scalar::from(123u64))]);
        let digest = point_to_digest(&point);
        assert_eq!(digest_to_point(&digest), Some(point));
    }
}
