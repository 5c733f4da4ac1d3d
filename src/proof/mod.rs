//! Commitments, Merkle batches, combination and verification.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF LAYER                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  commitment.rs   - hash(secret) commitments and reveals     │
//! │  merkle.rs       - Batched secrets, inclusion proofs        │
//! │  combiner.rs     - Order-independent seed derivation        │
//! │  verify.rs       - Offline recomputation for auditors       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All functions here are pure and synchronous.

pub mod combiner;
pub mod commitment;
pub mod merkle;
pub mod verify;

// Re-export key types
pub use combiner::{combine, combine_with_entropy, CombinedSeed};
pub use commitment::{commit, Commitment, CommitmentError, CommitmentRecord, RevealRecord};
pub use merkle::{InclusionProof, MerkleBatch, MerkleError};
pub use verify::{verify_leaf, verify_round, verify_disclosure, RoundAudit, VerificationError};
