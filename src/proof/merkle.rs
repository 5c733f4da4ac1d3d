//! Merkle Batches
//!
//! Binary SHA-256 Merkle tree over a batch of precommitted secrets. The root
//! is published once, up front; each leaf is later disclosed together with
//! an [`InclusionProof`] that anyone can check against that root.
//!
//! ## Padding rule
//!
//! The leaf level is padded up to the next power of two with
//! `EMPTY = SHA-256(MERKLE_EMPTY_DOMAIN)`. Every level of the padded tree
//! therefore has even width and every proof for a batch has the same length
//! `log2(padded width)`. The builder and [`MerkleBatch::verify_proof`] share
//! [`hash_leaf`] and [`hash_nodes`], so they cannot drift apart.

use serde::{Serialize, Deserialize};

use crate::core::hash::{
    Digest, DomainHasher, MERKLE_LEAF_DOMAIN, MERKLE_NODE_DOMAIN, MERKLE_EMPTY_DOMAIN,
    digests_equal,
};
use crate::core::ids::BatchId;
use crate::core::secret::Secret;

/// Proofs deeper than this cannot come from a batch addressable by `usize`.
const MAX_PROOF_DEPTH: usize = usize::BITS as usize - 1;

/// Empty hash for padding (hash of empty domain).
fn empty_hash() -> Digest {
    DomainHasher::new(MERKLE_EMPTY_DOMAIN).finalize()
}

/// Merkle tree over one batch of secrets.
///
/// Holds only hashes; the secrets stay with whoever owns the batch.
#[derive(Clone, Debug)]
pub struct MerkleBatch {
    /// Batch identifier.
    batch_id: BatchId,
    /// Number of real (unpadded) leaves.
    leaf_count: usize,
    /// All tree levels (padded leaves at index 0, root at last index).
    levels: Vec<Vec<Digest>>,
}

impl MerkleBatch {
    /// Build a batch with a fresh random identifier.
    pub fn build(secrets: &[Secret]) -> Result<Self, MerkleError> {
        Self::build_with_id(BatchId::random(), secrets)
    }

    /// Build a batch under a caller-chosen identifier.
    pub fn build_with_id(batch_id: BatchId, secrets: &[Secret]) -> Result<Self, MerkleError> {
        if secrets.is_empty() {
            return Err(MerkleError::EmptyBatch);
        }

        let mut current_level: Vec<Digest> = secrets.iter().map(hash_leaf).collect();

        // Pad to power of 2 for balanced tree
        let target_size = current_level.len().next_power_of_two();
        current_level.resize(target_size, empty_hash());

        let mut levels = Vec::with_capacity(target_size.trailing_zeros() as usize + 1);

        // Build up to root
        while current_level.len() > 1 {
            let next_level: Vec<Digest> = current_level
                .chunks_exact(2)
                .map(|pair| hash_nodes(&pair[0], &pair[1]))
                .collect();

            levels.push(current_level);
            current_level = next_level;
        }
        levels.push(current_level);

        Ok(Self {
            batch_id,
            leaf_count: secrets.len(),
            levels,
        })
    }

    /// Batch identifier.
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Root hash, fixed at construction.
    pub fn root(&self) -> Digest {
        // Construction always leaves exactly one node on the top level
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves N.
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    /// Always false; empty batches cannot be built.
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Depth of the tree (= length of every proof).
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Generate the inclusion proof for leaf `index`.
    pub fn prove_index(&self, index: usize) -> Result<InclusionProof, MerkleError> {
        if index >= self.leaf_count {
            return Err(MerkleError::IndexOutOfRange {
                index,
                size: self.leaf_count,
            });
        }

        let mut siblings = Vec::with_capacity(self.depth());
        let mut current_index = index;

        // Walk up the tree, collecting sibling hashes
        for level in &self.levels[..self.depth()] {
            siblings.push(level[current_index ^ 1]);
            current_index /= 2;
        }

        Ok(InclusionProof {
            leaf_index: index,
            siblings,
        })
    }

    /// Verify that `leaf` sits at `index` under `root`.
    ///
    /// Returns false on any mismatch; never panics.
    pub fn verify_proof(leaf: &Secret, index: usize, proof: &InclusionProof, root: &Digest) -> bool {
        Self::verify_proof_with_hash(&hash_leaf(leaf), index, proof, root)
    }

    /// Verify a proof using a pre-hashed leaf.
    ///
    /// `leaf_hash` must come from [`hash_leaf`]; the padding digest would
    /// otherwise prove an empty slot.
    fn verify_proof_with_hash(
        leaf_hash: &Digest,
        index: usize,
        proof: &InclusionProof,
        root: &Digest,
    ) -> bool {
        if proof.leaf_index != index {
            return false;
        }
        let depth = proof.siblings.len();
        if depth > MAX_PROOF_DEPTH || (index >> depth) != 0 {
            return false;
        }

        let mut current_hash = *leaf_hash;
        let mut position = index;

        for sibling in &proof.siblings {
            current_hash = if position % 2 == 0 {
                hash_nodes(&current_hash, sibling)
            } else {
                hash_nodes(sibling, &current_hash)
            };
            position /= 2;
        }

        digests_equal(&current_hash, root)
    }
}

/// Merkle inclusion proof.
///
/// Contains the sibling path from a leaf to the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Index of the leaf this proof is for.
    pub leaf_index: usize,
    /// Sibling hashes, leaf level first. Left/right follows from the index bits.
    pub siblings: Vec<Digest>,
}

impl InclusionProof {
    /// Estimated size in bytes.
    pub fn size(&self) -> usize {
        8 + self.siblings.len() * 32
    }
}

/// Merkle batch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// A batch needs at least one secret.
    #[error("cannot build a batch from zero secrets")]
    EmptyBatch,

    /// Leaf index past the end of the batch.
    #[error("leaf index {index} out of range for batch of {size}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Batch size.
        size: usize,
    },
}

/// Hash a leaf secret with domain separation.
pub fn hash_leaf(secret: &Secret) -> Digest {
    let mut hasher = DomainHasher::new(MERKLE_LEAF_DOMAIN);
    hasher.update_bytes(secret.as_bytes());
    hasher.finalize()
}

/// Hash two child nodes with domain separation.
fn hash_nodes(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = DomainHasher::new(MERKLE_NODE_DOMAIN);
    hasher.update_bytes(left);
    hasher.update_bytes(right);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secret::SECRET_LEN;
    use proptest::prelude::*;

    fn secrets(n: usize) -> Vec<Secret> {
        (0..n)
            .map(|i| {
                let mut bytes = [0u8; SECRET_LEN];
                bytes[..8].copy_from_slice(&(i as u64).to_le_bytes());
                Secret::from_bytes(bytes)
            })
            .collect()
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert_eq!(MerkleBatch::build(&[]).unwrap_err(), MerkleError::EmptyBatch);
    }

    #[test]
    fn test_single_leaf() {
        let s = secrets(1);
        let batch = MerkleBatch::build(&s).unwrap();
        assert_eq!(batch.root(), hash_leaf(&s[0]));
        assert_eq!(batch.depth(), 0);

        let proof = batch.prove_index(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(MerkleBatch::verify_proof(&s[0], 0, &proof, &batch.root()));
        assert!(!MerkleBatch::verify_proof(&s[0], 1, &proof, &batch.root()));
    }

    #[test]
    fn test_root_determinism() {
        let s = secrets(4);
        let a = MerkleBatch::build(&s).unwrap();
        let b = MerkleBatch::build(&s).unwrap();
        assert_eq!(a.root(), b.root());
        assert_ne!(a.batch_id(), b.batch_id());
    }

    #[test]
    fn test_different_leaves_different_root() {
        let mut s = secrets(4);
        let a = MerkleBatch::build(&s).unwrap();
        s[3] = Secret::from_bytes([0xff; SECRET_LEN]);
        let b = MerkleBatch::build(&s).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_leaf_order_matters() {
        let mut s = secrets(4);
        let a = MerkleBatch::build(&s).unwrap();
        s.swap(0, 1);
        let b = MerkleBatch::build(&s).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_every_proof_verifies() {
        for n in [1, 2, 3, 4, 5, 7, 8, 100] {
            let s = secrets(n);
            let batch = MerkleBatch::build(&s).unwrap();
            let root = batch.root();
            for (i, leaf) in s.iter().enumerate() {
                let proof = batch.prove_index(i).unwrap();
                assert_eq!(proof.siblings.len(), batch.depth());
                assert!(MerkleBatch::verify_proof(leaf, i, &proof, &root), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let batch = MerkleBatch::build(&secrets(3)).unwrap();
        assert_eq!(
            batch.prove_index(3).unwrap_err(),
            MerkleError::IndexOutOfRange { index: 3, size: 3 }
        );
    }

    #[test]
    fn test_wrong_index_fails() {
        let s = secrets(4);
        let batch = MerkleBatch::build(&s).unwrap();
        let root = batch.root();
        let proof = batch.prove_index(2).unwrap();

        assert!(!MerkleBatch::verify_proof(&s[2], 3, &proof, &root));

        let mut relabeled = proof.clone();
        relabeled.leaf_index = 3;
        assert!(!MerkleBatch::verify_proof(&s[2], 3, &relabeled, &root));
    }

    #[test]
    fn test_index_beyond_depth_fails() {
        let s = secrets(4);
        let batch = MerkleBatch::build(&s).unwrap();
        let mut proof = batch.prove_index(0).unwrap();
        proof.leaf_index = 4;
        assert!(!MerkleBatch::verify_proof(&s[0], 4, &proof, &batch.root()));
    }

    #[test]
    fn test_truncated_proof_fails() {
        let s = secrets(8);
        let batch = MerkleBatch::build(&s).unwrap();
        let mut proof = batch.prove_index(5).unwrap();
        proof.siblings.pop();
        assert!(!MerkleBatch::verify_proof(&s[5], 5, &proof, &batch.root()));
    }

    #[test]
    fn test_padding_leaf_not_provable() {
        let batch = MerkleBatch::build(&secrets(3)).unwrap();
        assert!(batch.prove_index(3).is_err());
    }

    #[test]
    fn test_padding_slot_rejects_every_secret() {
        let s = secrets(3);
        let batch = MerkleBatch::build(&s).unwrap();
        // Genuine path for slot 3, which holds the padding digest
        let proof = InclusionProof {
            leaf_index: 3,
            siblings: vec![batch.levels[0][2], batch.levels[1][0]],
        };
        assert!(MerkleBatch::verify_proof_with_hash(&empty_hash(), 3, &proof, &batch.root()));

        for secret in &s {
            assert!(!MerkleBatch::verify_proof(secret, 3, &proof, &batch.root()));
        }
    }

    proptest! {
        #[test]
        fn prop_corrupted_sibling_fails(
            n in 2usize..64,
            pick in any::<prop::sample::Index>(),
            bit in 0usize..256,
        ) {
            let s = secrets(n);
            let batch = MerkleBatch::build(&s).unwrap();
            let i = pick.index(n);
            let mut proof = batch.prove_index(i).unwrap();
            let level = (bit / 8) % proof.siblings.len();
            proof.siblings[level][bit % 32] ^= 1 << (bit % 8);
            prop_assert!(!MerkleBatch::verify_proof(&s[i], i, &proof, &batch.root()));
        }
    }
}
