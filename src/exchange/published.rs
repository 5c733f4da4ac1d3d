//! Published Exchange
//!
//! Parties post commitments and reveals to a shared [`RevealCoordinator`],
//! which pushes every record to the ledger. Any number of participants;
//! the round's policy decides how many reveals are needed.

use std::sync::Arc;
use tracing::debug;

use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::exchange::{ExchangeError, ExchangeOutcome, SeedExchange};
use crate::ledger::records::RoundOutcome;
use crate::proof::commitment::commit;
use crate::round::coordinator::{CoordinatorError, RevealCoordinator};
use crate::round::state::{RoundError, RoundPhase};

/// One participant's handle on a coordinated round.
#[derive(Clone)]
pub struct PublishedExchange {
    party: PartyId,
    coordinator: Arc<RevealCoordinator>,
}

impl PublishedExchange {
    /// Act as `party` through `coordinator`.
    pub fn new(party: PartyId, coordinator: Arc<RevealCoordinator>) -> Self {
        Self { party, coordinator }
    }
}

impl SeedExchange for PublishedExchange {
    fn party(&self) -> PartyId {
        self.party
    }

    async fn exchange(&mut self, round_id: RoundId, secret: Secret) -> Result<ExchangeOutcome, ExchangeError> {
        let coordinator = &self.coordinator;

        coordinator.submit_commitment(round_id, self.party, commit(&secret)).await?;
        let phase = coordinator
            .wait_for(round_id, |phase| phase != RoundPhase::Open)
            .await?;
        debug!("Round {:?}: {:?} sees phase {:?} after committing", round_id, self.party, phase);

        // Otherwise combined without us, or aborted: the outcome says which
        if phase == RoundPhase::AwaitingReveal {
            match coordinator.submit_reveal(round_id, self.party, secret).await {
                // Others reached the threshold first
                Ok(_)
                | Err(CoordinatorError::Round(RoundError::WrongPhase {
                    actual: RoundPhase::Combined,
                    ..
                })) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match coordinator.wait_outcome(round_id).await? {
            RoundOutcome::Combined { seed, .. } => Ok(ExchangeOutcome {
                round_id,
                seed,
                audit: coordinator.audit(round_id).await?,
            }),
            RoundOutcome::Aborted { reason, .. } => Err(RoundError::Aborted(reason).into()),
        }
    }
}
