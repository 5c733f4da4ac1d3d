//! Domain-Separated Hashing
//!
//! Every hash computed by this crate goes through a domain tag so that a
//! commitment can never be confused with a Merkle node, a combined seed, or
//! any other SHA-256 use in the host system.

use sha2::{Sha256, Digest as _};
use subtle::ConstantTimeEq;

/// Hash output type (256 bits / 32 bytes)
pub type Digest = [u8; 32];

/// Domain tag for secret commitments.
pub const COMMIT_DOMAIN: &[u8] = b"VERIRAND_COMMIT_V1";

/// Domain tag for Merkle leaves.
pub const MERKLE_LEAF_DOMAIN: &[u8] = b"VERIRAND_MERKLE_LEAF_V1";

/// Domain tag for Merkle internal nodes.
pub const MERKLE_NODE_DOMAIN: &[u8] = b"VERIRAND_MERKLE_NODE_V1";

/// Domain tag for Merkle padding nodes.
pub const MERKLE_EMPTY_DOMAIN: &[u8] = b"VERIRAND_MERKLE_EMPTY_V1";

/// Domain tag for the combiner.
pub const COMBINE_DOMAIN: &[u8] = b"VERIRAND_COMBINE_V1";

/// Domain tag for event-derived entropy.
pub const EVENT_ENTROPY_DOMAIN: &[u8] = b"VERIRAND_EVENTS_V1";

/// Domain tag for ledger entry addresses.
pub const ENTRY_DOMAIN: &[u8] = b"VERIRAND_ENTRY_V1";

/// Incremental hasher with a domain separator absorbed first.
///
/// Order of updates is significant; integers are little-endian.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a length-prefixed byte string.
    #[inline]
    pub fn update_prefixed(&mut self, bytes: &[u8]) {
        self.update_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    /// Update with a 16-byte identifier.
    #[inline]
    pub fn update_id(&mut self, id: &[u8; 16]) {
        self.hasher.update(id);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Digest {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Digest {
    let mut hasher = DomainHasher::new(domain);
    hasher.update_bytes(data);
    hasher.finalize()
}

/// Constant-time digest equality.
#[inline]
pub fn digests_equal(a: &Digest, b: &Digest) -> bool {
    a[..].ct_eq(&b[..]).into()
}

/// Short hex prefix for log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}

// =============================================================================
// TESTS
// =============================================================================
