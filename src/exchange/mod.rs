//! Seed Exchange
//!
//! Two ways for a party to take part in a round:
//! - `direct.rs`    - two parties swap messages over a [`Transport`](crate::ledger::Transport)
//! - `published.rs` - parties post to a shared coordinator and its ledger
//!
//! Both end with the same [`ExchangeOutcome`]: the seed plus the audit an
//! outside verifier needs to recompute it.

use std::future::Future;

use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::ledger::transport::TransportError;
use crate::proof::combiner::CombinedSeed;
use crate::proof::verify::RoundAudit;
use crate::round::coordinator::CoordinatorError;
use crate::round::state::RoundError;

pub mod direct;
pub mod published;

pub use direct::DirectExchange;
pub use published::PublishedExchange;

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// Round the seed belongs to.
    pub round_id: RoundId,
    /// Agreed seed.
    pub seed: CombinedSeed,
    /// Commitments and reveals behind the seed.
    pub audit: RoundAudit,
}

/// Exchange errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// Local round state rejected a message.
    #[error(transparent)]
    Round(#[from] RoundError),

    /// Coordinator rejected a submission.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Message delivery failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Peer stayed silent past the exchange timeout.
    #[error("timed out waiting for {waiting_for} in round {round_id:?}")]
    Timeout {
        /// Round being exchanged.
        round_id: RoundId,
        /// What was expected next.
        waiting_for: &'static str,
    },

    /// Message from the wrong party or for another round.
    #[error("unexpected message from {party:?} for round {round_id:?}")]
    UnexpectedMessage {
        /// Sender named in the message.
        party: PartyId,
        /// Round named in the message.
        round_id: RoundId,
    },
}

/// One party's side of a commit-reveal round.
pub trait SeedExchange {
    /// Party this side acts for.
    fn party(&self) -> PartyId;

    /// Commit to `secret`, reveal it, and return the combined seed.
    fn exchange(
        &mut self,
        round_id: RoundId,
        secret: Secret,
    ) -> impl Future<Output = Result<ExchangeOutcome, ExchangeError>> + Send;
}
