//! Ledger Records
//!
//! Everything the core publishes to the external ledger: entry envelope,
//! entry kinds, and the typed payloads carried inside. Payloads are bincode,
//! the envelope's address is a SHA-256 over its content.

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;

use crate::core::hash::{Digest, DomainHasher, ENTRY_DOMAIN};
use crate::core::ids::{BatchId, PartyId, RoundId};
use crate::core::secret::Secret;
use crate::ledger::entropy::EventEntropy;
use crate::ledger::sink::LedgerError;
use crate::proof::combiner::CombinedSeed;
use crate::proof::commitment::Commitment;
use crate::proof::merkle::InclusionProof;
use crate::round::batch_ledger::LedgerKey;
use crate::round::state::{AbortReason, RoundPolicy};

/// What an entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Participants and policy of a round.
    RoundManifest,
    /// A party's commitment.
    Commitment,
    /// A party's reveal.
    Reveal,
    /// A reveal that failed to open its commitment.
    FraudEvidence,
    /// Event entropy folded into a round.
    ExternalEntropy,
    /// Terminal outcome of a round.
    RoundOutcome,
    /// Root of a Merkle batch.
    BatchRoot,
    /// A disclosed batch leaf with its proof.
    LeafDisclosure,
}

/// Who may read an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Readable by anyone.
    Public,
    /// Readable by the author and its counterparties only.
    Private,
}

/// Round or batch an entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// A commit-reveal round.
    Round(RoundId),
    /// A Merkle batch.
    Batch(BatchId),
}

/// Content address of an entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryHandle(pub Digest);

impl fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryHandle({})", hex::encode(&self.0[..6]))
    }
}

/// Immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// What the payload is.
    pub kind: EntryKind,
    /// Read access.
    pub visibility: Visibility,
    /// Round or batch this entry is keyed by.
    pub subject: Subject,
    /// Publishing party, when the record is party-specific.
    pub author: Option<PartyId>,
    /// Bincode-encoded payload.
    pub payload: Vec<u8>,
    /// Wall-clock publication time (not part of the address).
    pub published_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Encode a payload into a new entry.
    pub fn new<T: Serialize>(
        kind: EntryKind,
        visibility: Visibility,
        subject: Subject,
        author: Option<PartyId>,
        payload: &T,
    ) -> Result<Self, LedgerError> {
        let payload = bincode::serialize(payload)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(Self {
            kind,
            visibility,
            subject,
            author,
            payload,
            published_at: Utc::now(),
        })
    }

    /// Decode the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, LedgerError> {
        bincode::deserialize(&self.payload)
            .map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Content address: kind, subject, author and payload.
    ///
    /// Republishing identical content yields the same handle.
    pub fn address(&self) -> EntryHandle {
        let mut hasher = DomainHasher::new(ENTRY_DOMAIN);
        hasher.update_u8(self.kind as u8);
        match self.subject {
            Subject::Round(id) => {
                hasher.update_u8(0);
                hasher.update_id(id.as_bytes());
            }
            Subject::Batch(id) => {
                hasher.update_u8(1);
                hasher.update_id(id.as_bytes());
            }
        }
        match self.author {
            Some(party) => {
                hasher.update_u8(1);
                hasher.update_id(party.as_bytes());
            }
            None => hasher.update_u8(0),
        }
        hasher.update_prefixed(&self.payload);
        EntryHandle(hasher.finalize())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Published when a round opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundManifest {
    /// Round identifier.
    pub round_id: RoundId,
    /// Sorted participant list.
    pub participants: Vec<PartyId>,
    /// Combination policy.
    pub policy: RoundPolicy,
}

impl RoundManifest {
    /// Number of valid reveals required to combine.
    pub fn quorum(&self) -> usize {
        self.policy.quorum(self.participants.len())
    }

    /// Is `party` a participant.
    pub fn includes(&self, party: &PartyId) -> bool {
        self.participants.binary_search(party).is_ok()
    }
}

/// A reveal that did not open the party's commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudRecord {
    /// Round identifier.
    pub round_id: RoundId,
    /// Offending party.
    pub party: PartyId,
    /// The commitment on record.
    pub commitment: Commitment,
    /// The secret that failed to open it.
    pub secret: Secret,
}

/// External entropy folded into a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEntropyRecord {
    /// Round identifier.
    pub round_id: RoundId,
    /// Digest of the observed events.
    pub entropy: EventEntropy,
}

/// Terminal state of a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Quorum reached.
    Combined {
        /// Round identifier.
        round_id: RoundId,
        /// Resulting seed.
        seed: CombinedSeed,
        /// Parties whose reveals were combined.
        contributors: Vec<PartyId>,
    },
    /// Round ended without a seed.
    Aborted {
        /// Round identifier.
        round_id: RoundId,
        /// Why.
        reason: AbortReason,
    },
}

/// Published before any leaf of a batch is used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRootRecord {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Owner (and counterparty) of the batch.
    pub key: LedgerKey,
    /// Merkle root.
    pub root: Digest,
    /// Number of leaves.
    pub size: usize,
    /// Sequence number of this batch for the key (0 for the first).
    pub sequence: u64,
}

/// A disclosed leaf with its inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafDisclosure {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Leaf index.
    pub index: usize,
    /// Leaf secret.
    pub secret: Secret,
    /// Path to the batch root.
    pub proof: InclusionProof,
}
