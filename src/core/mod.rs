//! Core primitives.
//!
//! Hashing, identifiers, secrets and the deterministic PRNG. Everything here
//! is synchronous and free of I/O.

pub mod hash;
pub mod ids;
pub mod rng;
pub mod secret;

// Re-export core types
pub use hash::{Digest, DomainHasher, hash_with_domain, digests_equal};
pub use ids::{PartyId, RoundId, BatchId};
pub use rng::DeterministicRng;
pub use secret::{
    Secret, SecretGenerator, CryptoSecretGenerator, OsSecretGenerator,
    EntropyUnavailable, SECRET_LEN,
};
