//! Crate-level error.
//!
//! Each module has its own error enum; [`Error`] gathers them and sorts any
//! failure into a [`FailureClass`], so an application can tell "party X
//! cheated" apart from "the records are missing" or "someone went quiet".

use crate::config::ConfigError;
use crate::core::ids::PartyId;
use crate::core::secret::EntropyUnavailable;
use crate::exchange::ExchangeError;
use crate::ledger::capability::CapabilityError;
use crate::ledger::entropy::EntropyError;
use crate::ledger::sink::LedgerError;
use crate::ledger::transport::TransportError;
use crate::proof::commitment::CommitmentError;
use crate::proof::merkle::MerkleError;
use crate::proof::verify::VerificationError;
use crate::round::batch_ledger::BatchError;
use crate::round::coordinator::CoordinatorError;
use crate::round::state::{AbortReason, RoundError};

/// What kind of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// A participant broke the protocol.
    ProtocolViolation {
        /// Party at fault.
        party: PartyId,
    },
    /// Records needed for a decision are missing or unreadable.
    DataUnavailable,
    /// A peer or round did not progress in time.
    Liveness,
    /// Local misuse, configuration, or resource failure.
    Local,
}

/// Any error raised by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Secret generation failed.
    #[error(transparent)]
    Entropy(#[from] EntropyUnavailable),

    /// Event entropy could not be derived.
    #[error(transparent)]
    EventEntropy(#[from] EntropyError),

    /// A reveal did not open its commitment.
    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    /// Merkle batch error.
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// Ledger error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Batch ledger error.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Round state error.
    #[error(transparent)]
    Round(#[from] RoundError),

    /// Coordinator error.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Offline verification failed.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Seed exchange failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Capability token error.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify the failure.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Commitment(CommitmentError::Mismatch { party }) => {
                FailureClass::ProtocolViolation { party: *party }
            }
            Self::Ledger(_) | Self::EventEntropy(_) => FailureClass::DataUnavailable,
            Self::Batch(e) => batch_class(e),
            Self::Round(e) => round_class(e),
            Self::Coordinator(e) => coordinator_class(e),
            Self::Verification(e) => verification_class(e),
            Self::Exchange(e) => exchange_class(e),
            Self::Transport(_) => FailureClass::Liveness,
            Self::Config(_) | Self::Entropy(_) | Self::Merkle(_) | Self::Capability(_) => {
                FailureClass::Local
            }
        }
    }
}

fn batch_class(e: &BatchError) -> FailureClass {
    match e {
        BatchError::Ledger(_) => FailureClass::DataUnavailable,
        _ => FailureClass::Local,
    }
}

fn round_class(e: &RoundError) -> FailureClass {
    match e {
        RoundError::CommitmentMismatch { party }
        | RoundError::Aborted(AbortReason::CommitmentMismatch { party }) => {
            FailureClass::ProtocolViolation { party: *party }
        }
        RoundError::UnknownParty(party)
        | RoundError::AlreadyCommitted(party)
        | RoundError::AlreadyRevealed(party)
        | RoundError::RevealBeforeCommitment(party)
        | RoundError::Disqualified(party) => FailureClass::ProtocolViolation { party: *party },
        RoundError::Aborted(AbortReason::Timeout { .. })
        | RoundError::Aborted(AbortReason::QuorumUnreachable { .. }) => FailureClass::Liveness,
        RoundError::Aborted(AbortReason::Cancelled)
        | RoundError::UnknownRound(_)
        | RoundError::NoParticipants
        | RoundError::InvalidPolicy { .. }
        | RoundError::WrongPhase { .. } => FailureClass::Local,
    }
}

fn coordinator_class(e: &CoordinatorError) -> FailureClass {
    match e {
        CoordinatorError::Round(e) => round_class(e),
        CoordinatorError::Ledger(_) => FailureClass::DataUnavailable,
    }
}

fn verification_class(e: &VerificationError) -> FailureClass {
    match e.offending_party() {
        Some(party) => FailureClass::ProtocolViolation { party },
        None => FailureClass::DataUnavailable,
    }
}

fn exchange_class(e: &ExchangeError) -> FailureClass {
    match e {
        ExchangeError::Round(e) => round_class(e),
        ExchangeError::Coordinator(e) => coordinator_class(e),
        ExchangeError::Transport(_) | ExchangeError::Timeout { .. } => FailureClass::Liveness,
        ExchangeError::UnexpectedMessage { party, .. } => FailureClass::ProtocolViolation { party: *party },
    }
}
