//! Offline Verification
//!
//! Recompute a round's seed, or check a disclosed leaf, from published data
//! alone. Nothing here talks to a participant or to the network.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::core::hash::Digest;
use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::ledger::entropy::EventEntropy;
use crate::ledger::records::{
    EntryKind, ExternalEntropyRecord, LeafDisclosure, RoundManifest, RoundOutcome, Subject,
};
use crate::ledger::sink::{LedgerError, PersistenceSink};
use crate::proof::combiner::{combine_with_entropy, CombinedSeed};
use crate::proof::commitment::{Commitment, CommitmentRecord, RevealRecord};
use crate::proof::merkle::{InclusionProof, MerkleBatch};

/// Published data for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAudit {
    /// Participants and policy.
    pub manifest: RoundManifest,
    /// Commitments by party.
    pub commitments: BTreeMap<PartyId, Commitment>,
    /// Published reveals, in ledger order.
    pub reveals: Vec<RevealRecord>,
    /// Event entropy folded into the round.
    pub external_entropy: Vec<EventEntropy>,
    /// Parties the round combined, as named by its published outcome.
    #[serde(default)]
    pub contributors: Option<Vec<PartyId>>,
}

impl RoundAudit {
    /// Rebuild an audit from ledger records.
    ///
    /// Fraud evidence is not part of the audit; it is never combined.
    /// Reveals republished after the round combined are kept, and the
    /// outcome's contributor list decides which of them count.
    pub fn fetch<S: PersistenceSink + ?Sized>(sink: &S, round_id: RoundId) -> Result<Self, VerificationError> {
        let entries = sink
            .entries_for(&Subject::Round(round_id))
            .map_err(VerificationError::DataUnavailable)?;

        let mut manifest: Option<RoundManifest> = None;
        let mut commitments = BTreeMap::new();
        let mut reveals = Vec::new();
        let mut external_entropy = Vec::new();
        let mut contributors = None;

        for entry in &entries {
            match entry.kind {
                EntryKind::RoundManifest => {
                    manifest = Some(entry.decode().map_err(VerificationError::DataUnavailable)?);
                }
                EntryKind::Commitment => {
                    let record: CommitmentRecord =
                        entry.decode().map_err(VerificationError::DataUnavailable)?;
                    commitments.insert(record.party, record.commitment);
                }
                EntryKind::Reveal => {
                    reveals.push(entry.decode().map_err(VerificationError::DataUnavailable)?);
                }
                EntryKind::ExternalEntropy => {
                    let record: ExternalEntropyRecord =
                        entry.decode().map_err(VerificationError::DataUnavailable)?;
                    external_entropy.push(record.entropy);
                }
                EntryKind::RoundOutcome => {
                    let outcome: RoundOutcome =
                        entry.decode().map_err(VerificationError::DataUnavailable)?;
                    if let RoundOutcome::Combined { contributors: named, .. } = outcome {
                        contributors = Some(named);
                    }
                }
                _ => {}
            }
        }

        let manifest = manifest.ok_or(VerificationError::MissingManifest(round_id))?;
        Ok(Self { manifest, commitments, reveals, external_entropy, contributors })
    }
}

/// Verification errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// A reveal did not open its commitment.
    #[error("reveal from {party:?} does not match its commitment")]
    CommitmentMismatch {
        /// Offending party.
        party: PartyId,
    },

    /// Not enough valid reveals for the policy.
    #[error("have {have} reveals, policy needs {need}")]
    IncompleteReveals {
        /// Valid reveals provided.
        have: usize,
        /// Reveals required.
        need: usize,
    },

    /// A reveal without a published commitment.
    #[error("reveal from {0:?} has no published commitment")]
    MissingCommitment(PartyId),

    /// A record belongs to another round.
    #[error("record for round {found:?} in audit of {expected:?}")]
    RoundMismatch {
        /// Round being verified.
        expected: RoundId,
        /// Round named by the record.
        found: RoundId,
    },

    /// A record names a non-participant.
    #[error("{0:?} is not a participant")]
    UnknownParty(PartyId),

    /// Same party revealed twice.
    #[error("{0:?} revealed more than once")]
    DuplicateReveal(PartyId),

    /// The published contributor list does not match the policy or the reveals.
    #[error("outcome of round {0:?} names contributors the reveals do not support")]
    InconsistentOutcome(RoundId),

    /// No manifest published for the round.
    #[error("no manifest published for round {0:?}")]
    MissingManifest(RoundId),

    /// Ledger could not supply the records.
    #[error("ledger data unavailable: {0}")]
    DataUnavailable(LedgerError),
}

impl VerificationError {
    /// Party at fault, if the failure is a protocol violation.
    pub fn offending_party(&self) -> Option<PartyId> {
        match self {
            Self::CommitmentMismatch { party } => Some(*party),
            Self::MissingCommitment(party)
            | Self::UnknownParty(party)
            | Self::DuplicateReveal(party) => Some(*party),
            _ => None,
        }
    }
}

/// Recompute a round's seed from its published data.
///
/// Every reveal must open its commitment, but only the quorum is combined:
/// the contributors named by the outcome when present, otherwise the first
/// reveals in ledger order. A valid reveal published after the round
/// combined never changes the seed.
pub fn verify_round(round_id: RoundId, audit: &RoundAudit) -> Result<CombinedSeed, VerificationError> {
    if audit.manifest.round_id != round_id {
        return Err(VerificationError::RoundMismatch {
            expected: round_id,
            found: audit.manifest.round_id,
        });
    }

    let mut opened: BTreeMap<PartyId, &Secret> = BTreeMap::new();
    let mut arrival = Vec::with_capacity(audit.reveals.len());
    for reveal in &audit.reveals {
        if reveal.round_id != round_id {
            return Err(VerificationError::RoundMismatch { expected: round_id, found: reveal.round_id });
        }
        if !audit.manifest.includes(&reveal.party) {
            return Err(VerificationError::UnknownParty(reveal.party));
        }
        let commitment = audit
            .commitments
            .get(&reveal.party)
            .ok_or(VerificationError::MissingCommitment(reveal.party))?;
        if !commitment.verify(&reveal.secret) {
            return Err(VerificationError::CommitmentMismatch { party: reveal.party });
        }
        if opened.insert(reveal.party, &reveal.secret).is_some() {
            return Err(VerificationError::DuplicateReveal(reveal.party));
        }
        arrival.push(reveal.party);
    }

    let need = audit.manifest.quorum();
    let chosen: Vec<PartyId> = match &audit.contributors {
        Some(named) => {
            let distinct: BTreeSet<&PartyId> = named.iter().collect();
            if named.len() != need || distinct.len() != need {
                return Err(VerificationError::InconsistentOutcome(round_id));
            }
            let have = named.iter().filter(|p| opened.contains_key(*p)).count();
            if have < need {
                return Err(VerificationError::IncompleteReveals { have, need });
            }
            named.clone()
        }
        None => {
            if arrival.len() < need {
                return Err(VerificationError::IncompleteReveals { have: arrival.len(), need });
            }
            arrival[..need].to_vec()
        }
    };

    let secrets = chosen.iter().filter_map(|party| opened.get(party).copied());
    Ok(combine_with_entropy(secrets, &audit.external_entropy))
}

/// Check a disclosed leaf against a published batch root.
pub fn verify_leaf(batch_root: &Digest, index: usize, leaf_secret: &Secret, proof: &InclusionProof) -> bool {
    MerkleBatch::verify_proof(leaf_secret, index, proof, batch_root)
}

/// Check a published leaf disclosure against a published batch root.
pub fn verify_disclosure(batch_root: &Digest, disclosure: &LeafDisclosure) -> bool {
    verify_leaf(batch_root, disclosure.index, &disclosure.secret, &disclosure.proof)
}
