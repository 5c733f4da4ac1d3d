//! Hash Commitments
//!
//! Commit to a secret before anyone reveals. The commitment is
//! `SHA-256(COMMIT_DOMAIN || secret)`; opening it is a constant-time
//! recompute-and-compare.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::hash::{Digest, COMMIT_DOMAIN, DomainHasher, digests_equal};
use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;

/// Public one-way commitment to a [`Secret`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commitment(pub Digest);

impl Commitment {
    /// Commit to a secret.
    pub fn commit(secret: &Secret) -> Self {
        let mut hasher = DomainHasher::new(COMMIT_DOMAIN);
        hasher.update_bytes(secret.as_bytes());
        Self(hasher.finalize())
    }

    /// Check that `secret` opens this commitment.
    pub fn verify(&self, secret: &Secret) -> bool {
        let computed = Self::commit(secret);
        digests_equal(&computed.0, &self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", hex::encode(&self.0[..4]))
    }
}

/// Commit to a secret.
pub fn commit(secret: &Secret) -> Commitment {
    Commitment::commit(secret)
}

/// Check that `secret` opens `commitment`.
pub fn verify(secret: &Secret, commitment: &Commitment) -> bool {
    commitment.verify(secret)
}

/// A party's published commitment for a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    /// Round the commitment belongs to.
    pub round_id: RoundId,
    /// Committing party.
    pub party: PartyId,
    /// The commitment.
    pub commitment: Commitment,
}

/// A party's revealed secret for a round (published after the commitment).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRecord {
    /// Round the reveal belongs to.
    pub round_id: RoundId,
    /// Revealing party.
    pub party: PartyId,
    /// The secret.
    pub secret: Secret,
}

impl RevealRecord {
    /// Create a new reveal.
    pub fn new(round_id: RoundId, party: PartyId, secret: Secret) -> Self {
        Self { round_id, party, secret }
    }

    /// Verify reveal against a commitment.
    pub fn verify(&self, commitment: &Commitment) -> Result<(), CommitmentError> {
        if commitment.verify(&self.secret) {
            Ok(())
        } else {
            Err(CommitmentError::Mismatch { party: self.party })
        }
    }
}

/// Errors that can occur when opening a commitment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentError {
    /// Secret hash doesn't match commitment.
    #[error("revealed secret from {party:?} does not match its commitment")]
    Mismatch {
        /// Party whose reveal failed.
        party: PartyId,
    },
}
