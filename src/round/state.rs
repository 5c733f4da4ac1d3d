//! Round State Machine
//!
//! One commit-reveal round: `Open -> AwaitingReveal -> Combined | Aborted`.
//!
//! A reveal is only looked at once the same party's commitment is on record,
//! and no reveal is accepted at all until every participant has committed.
//! The type is single-owner; the coordinator serializes access to it.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::ledger::entropy::EventEntropy;
use crate::ledger::records::{FraudRecord, RoundManifest, RoundOutcome};
use crate::proof::combiner::{combine_with_entropy, CombinedSeed};
use crate::proof::commitment::{Commitment, RevealRecord};
use crate::proof::verify::RoundAudit;

/// How many valid reveals a round needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPolicy {
    /// Every participant must reveal (n-of-n).
    AllOf,
    /// At least `k` participants must reveal.
    Threshold {
        /// Required valid reveals.
        k: usize,
    },
}

impl RoundPolicy {
    /// Valid reveals required among `participants`.
    pub fn quorum(&self, participants: usize) -> usize {
        match self {
            Self::AllOf => participants,
            Self::Threshold { k } => *k,
        }
    }

    fn validate(&self, participants: usize) -> Result<(), RoundError> {
        match self {
            Self::Threshold { k } if *k == 0 || *k > participants => {
                Err(RoundError::InvalidPolicy { k: *k, participants })
            }
            _ => Ok(()),
        }
    }
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    /// Collecting commitments.
    Open,
    /// All commitments in; collecting reveals.
    AwaitingReveal,
    /// Seed produced (terminal).
    Combined,
    /// No seed (terminal).
    Aborted,
}

impl RoundPhase {
    /// Combined or Aborted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Combined | Self::Aborted)
    }
}

/// Why a round ended without a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Deadline passed before quorum.
    Timeout {
        /// Commitments received.
        commitments: usize,
        /// Valid reveals received.
        reveals: usize,
        /// Reveals required.
        need: usize,
    },
    /// A party's reveal failed its commitment under an n-of-n policy.
    CommitmentMismatch {
        /// Offending party.
        party: PartyId,
    },
    /// Too many parties disqualified for quorum to be reachable.
    QuorumUnreachable {
        /// Most valid reveals still obtainable.
        possible: usize,
        /// Reveals required.
        need: usize,
    },
    /// Closed by the caller.
    Cancelled,
}

/// Errors from round submissions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    /// No such round.
    #[error("unknown round {0:?}")]
    UnknownRound(RoundId),

    /// A round needs at least one participant.
    #[error("round has no participants")]
    NoParticipants,

    /// Threshold outside `1..=participants`.
    #[error("threshold {k} invalid for {participants} participants")]
    InvalidPolicy {
        /// Requested threshold.
        k: usize,
        /// Participant count.
        participants: usize,
    },

    /// Party is not a participant.
    #[error("{0:?} is not a participant")]
    UnknownParty(PartyId),

    /// Submission not valid in the current phase.
    #[error("expected phase {expected:?}, round is {actual:?}")]
    WrongPhase {
        /// Phase the submission needs.
        expected: RoundPhase,
        /// Current phase.
        actual: RoundPhase,
    },

    /// Party already committed.
    #[error("{0:?} already committed")]
    AlreadyCommitted(PartyId),

    /// Party already revealed.
    #[error("{0:?} already revealed")]
    AlreadyRevealed(PartyId),

    /// Reveal arrived before the party's own commitment.
    #[error("{0:?} revealed before committing")]
    RevealBeforeCommitment(PartyId),

    /// Reveal did not open the party's commitment.
    #[error("reveal from {party:?} does not match its commitment")]
    CommitmentMismatch {
        /// Offending party.
        party: PartyId,
    },

    /// Party was excluded after a mismatching reveal.
    #[error("{0:?} is disqualified from this round")]
    Disqualified(PartyId),

    /// Round already ended without a seed.
    #[error("round aborted: {0:?}")]
    Aborted(AbortReason),
}

/// A single commit-reveal round.
#[derive(Debug, Clone)]
pub struct Round {
    manifest: RoundManifest,
    deadline: Instant,
    phase: RoundPhase,
    commitments: BTreeMap<PartyId, Commitment>,
    reveals: BTreeMap<PartyId, Secret>,
    fraud: Vec<FraudRecord>,
    disqualified: BTreeSet<PartyId>,
    external_entropy: Vec<EventEntropy>,
    seed: Option<CombinedSeed>,
    abort_reason: Option<AbortReason>,
}

impl Round {
    /// Open a round.
    pub fn new<I>(
        round_id: RoundId,
        participants: I,
        policy: RoundPolicy,
        deadline: Instant,
    ) -> Result<Self, RoundError>
    where
        I: IntoIterator<Item = PartyId>,
    {
        let participants: Vec<PartyId> = participants
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if participants.is_empty() {
            return Err(RoundError::NoParticipants);
        }
        policy.validate(participants.len())?;

        Ok(Self {
            manifest: RoundManifest { round_id, participants, policy },
            deadline,
            phase: RoundPhase::Open,
            commitments: BTreeMap::new(),
            reveals: BTreeMap::new(),
            fraud: Vec::new(),
            disqualified: BTreeSet::new(),
            external_entropy: Vec::new(),
            seed: None,
            abort_reason: None,
        })
    }

    /// Round identifier.
    pub fn id(&self) -> RoundId {
        self.manifest.round_id
    }

    /// Participants and policy.
    pub fn manifest(&self) -> &RoundManifest {
        &self.manifest
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Deadline for reaching quorum.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Seed, once combined.
    pub fn seed(&self) -> Option<CombinedSeed> {
        self.seed
    }

    /// Abort reason, once aborted.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    /// Recorded commitments.
    pub fn commitments(&self) -> &BTreeMap<PartyId, Commitment> {
        &self.commitments
    }

    /// Valid reveals so far, as publishable records.
    pub fn reveals(&self) -> Vec<RevealRecord> {
        self.reveals
            .iter()
            .map(|(party, secret)| RevealRecord::new(self.id(), *party, secret.clone()))
            .collect()
    }

    /// Fraud evidence collected so far.
    pub fn fraud_evidence(&self) -> &[FraudRecord] {
        &self.fraud
    }

    /// Terminal outcome, if any.
    pub fn outcome(&self) -> Option<RoundOutcome> {
        match self.phase {
            RoundPhase::Combined => self.seed.map(|seed| RoundOutcome::Combined {
                round_id: self.id(),
                seed,
                contributors: self.reveals.keys().copied().collect(),
            }),
            RoundPhase::Aborted => self.abort_reason.clone().map(|reason| RoundOutcome::Aborted {
                round_id: self.id(),
                reason,
            }),
            _ => None,
        }
    }

    /// Everything an offline verifier needs, including partial data.
    pub fn audit(&self) -> RoundAudit {
        RoundAudit {
            manifest: self.manifest.clone(),
            commitments: self.commitments.clone(),
            reveals: self.reveals(),
            external_entropy: self.external_entropy.clone(),
            contributors: self.seed.map(|_| self.reveals.keys().copied().collect()),
        }
    }

    /// Abort if the deadline has passed. Returns true if this call aborted.
    pub fn check_deadline(&mut self, now: Instant) -> bool {
        if self.phase.is_terminal() || now < self.deadline {
            return false;
        }
        let reason = AbortReason::Timeout {
            commitments: self.commitments.len(),
            reveals: self.reveals.len(),
            need: self.manifest.quorum(),
        };
        self.abort(reason);
        true
    }

    /// Close the round without a seed.
    pub fn cancel(&mut self) {
        if !self.phase.is_terminal() {
            self.abort(AbortReason::Cancelled);
        }
    }

    /// Fold event entropy into the round. Only while collecting commitments.
    pub fn add_external_entropy(&mut self, entropy: EventEntropy, now: Instant) -> Result<(), RoundError> {
        self.ensure_live(now)?;
        self.expect_phase(RoundPhase::Open)?;
        self.external_entropy.push(entropy);
        Ok(())
    }

    /// Record a party's commitment.
    pub fn submit_commitment(
        &mut self,
        party: PartyId,
        commitment: Commitment,
        now: Instant,
    ) -> Result<RoundPhase, RoundError> {
        self.ensure_live(now)?;
        self.ensure_participant(&party)?;
        self.expect_phase(RoundPhase::Open)?;

        if self.commitments.contains_key(&party) {
            return Err(RoundError::AlreadyCommitted(party));
        }
        self.commitments.insert(party, commitment);
        debug!(
            "Round {:?}: commitment from {:?} ({}/{})",
            self.id(),
            party,
            self.commitments.len(),
            self.manifest.participants.len()
        );

        if self.commitments.len() == self.manifest.participants.len() {
            self.phase = RoundPhase::AwaitingReveal;
            info!("Round {:?}: all commitments in, awaiting reveals", self.id());
        }
        Ok(self.phase)
    }

    /// Record a party's reveal; combines once quorum is reached.
    pub fn submit_reveal(
        &mut self,
        party: PartyId,
        secret: Secret,
        now: Instant,
    ) -> Result<RoundPhase, RoundError> {
        self.ensure_live(now)?;
        self.ensure_participant(&party)?;

        let commitment = match self.commitments.get(&party) {
            Some(c) => *c,
            None => return Err(RoundError::RevealBeforeCommitment(party)),
        };
        self.expect_phase(RoundPhase::AwaitingReveal)?;

        if self.disqualified.contains(&party) {
            return Err(RoundError::Disqualified(party));
        }
        if self.reveals.contains_key(&party) {
            return Err(RoundError::AlreadyRevealed(party));
        }

        if !commitment.verify(&secret) {
            self.record_fraud(party, commitment, secret);
            return Err(RoundError::CommitmentMismatch { party });
        }

        self.reveals.insert(party, secret);
        let need = self.manifest.quorum();
        debug!("Round {:?}: valid reveal from {:?} ({}/{})", self.id(), party, self.reveals.len(), need);

        if self.reveals.len() >= need {
            let seed = combine_with_entropy(self.reveals.values(), &self.external_entropy);
            self.seed = Some(seed);
            self.phase = RoundPhase::Combined;
            info!("Round {:?}: combined {} reveals into {}", self.id(), self.reveals.len(), seed);
        }
        Ok(self.phase)
    }

    fn record_fraud(&mut self, party: PartyId, commitment: Commitment, secret: Secret) {
        warn!("Round {:?}: reveal from {:?} does not match its commitment", self.id(), party);
        self.fraud.push(FraudRecord {
            round_id: self.id(),
            party,
            commitment,
            secret,
        });
        self.disqualified.insert(party);

        match self.manifest.policy {
            RoundPolicy::AllOf => self.abort(AbortReason::CommitmentMismatch { party }),
            RoundPolicy::Threshold { k } => {
                let possible = self.manifest.participants.len() - self.disqualified.len();
                if possible < k {
                    self.abort(AbortReason::QuorumUnreachable { possible, need: k });
                }
            }
        }
    }

    fn abort(&mut self, reason: AbortReason) {
        warn!("Round {:?} aborted: {:?}", self.id(), reason);
        self.phase = RoundPhase::Aborted;
        self.abort_reason = Some(reason);
    }

    fn ensure_live(&mut self, now: Instant) -> Result<(), RoundError> {
        self.check_deadline(now);
        match (&self.phase, &self.abort_reason) {
            (RoundPhase::Aborted, Some(reason)) => Err(RoundError::Aborted(reason.clone())),
            _ => Ok(()),
        }
    }

    fn ensure_participant(&self, party: &PartyId) -> Result<(), RoundError> {
        if self.manifest.includes(party) {
            Ok(())
        } else {
            Err(RoundError::UnknownParty(*party))
        }
    }

    fn expect_phase(&self, expected: RoundPhase) -> Result<(), RoundError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RoundError::WrongPhase { expected, actual: self.phase })
        }
    }
}
