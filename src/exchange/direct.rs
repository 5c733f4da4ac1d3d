//! Direct Exchange
//!
//! Two parties, no coordinator. Each side runs its own copy of the round
//! state machine fed with local and peer messages:
//!
//! ```text
//!   A                         B
//!   ├── Commit(c_A) ─────────►│
//!   │◄───────── Commit(c_B) ──┤
//!   ├── Reveal(s_A) ─────────►│
//!   │◄───────── Reveal(s_B) ──┤
//!   combine(s_A, s_B)         combine(s_A, s_B)
//! ```
//!
//! A side only reveals after the peer's commitment is on record, and a peer
//! reveal that shows up first is rejected by the round itself.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ProtocolConfig;
use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::exchange::{ExchangeError, ExchangeOutcome, SeedExchange};
use crate::ledger::transport::{ExchangeMessage, Transport};
use crate::proof::commitment::commit;
use crate::round::state::{Round, RoundError, RoundPhase, RoundPolicy};

/// Two-party exchange over a point-to-point transport.
pub struct DirectExchange<T> {
    local: PartyId,
    transport: T,
    timeout: Duration,
}

impl<T: Transport> DirectExchange<T> {
    /// Bind `local` to a transport whose peer is the other party.
    pub fn new(local: PartyId, transport: T, config: &ProtocolConfig) -> Self {
        Self {
            local,
            transport,
            timeout: config.exchange_timeout,
        }
    }

    /// The other party.
    pub fn peer(&self) -> PartyId {
        self.transport.peer()
    }

    /// Wait for the next peer message and feed it to the round.
    async fn receive_into(
        &mut self,
        round: &mut Round,
        waiting_for: &'static str,
    ) -> Result<RoundPhase, ExchangeError> {
        let round_id = round.id();
        let message = tokio::time::timeout(self.timeout, self.transport.receive())
            .await
            .map_err(|_| ExchangeError::Timeout { round_id, waiting_for })??;

        let peer = self.transport.peer();
        if message.round_id() != round_id || message.party() != peer {
            return Err(ExchangeError::UnexpectedMessage {
                party: message.party(),
                round_id: message.round_id(),
            });
        }

        let now = Instant::now();
        let phase = match message {
            ExchangeMessage::Commit { commitment, .. } => {
                round.submit_commitment(peer, commitment, now)?
            }
            ExchangeMessage::Reveal { secret, .. } => round.submit_reveal(peer, secret, now)?,
        };
        debug!("Round {:?}: {} from {:?} accepted", round_id, waiting_for, peer);
        Ok(phase)
    }
}

impl<T: Transport> SeedExchange for DirectExchange<T> {
    fn party(&self) -> PartyId {
        self.local
    }

    async fn exchange(&mut self, round_id: RoundId, secret: Secret) -> Result<ExchangeOutcome, ExchangeError> {
        let peer = self.transport.peer();
        // Two message waits bound the whole round
        let deadline = Instant::now() + self.timeout * 2;
        let mut round = Round::new(round_id, [self.local, peer], RoundPolicy::AllOf, deadline)?;

        let commitment = commit(&secret);
        round.submit_commitment(self.local, commitment, Instant::now())?;
        self.transport
            .send(&peer, &ExchangeMessage::Commit { round_id, party: self.local, commitment })
            .await?;

        let phase = self.receive_into(&mut round, "commitment").await?;
        if phase != RoundPhase::AwaitingReveal {
            return Err(RoundError::WrongPhase { expected: RoundPhase::AwaitingReveal, actual: phase }.into());
        }

        round.submit_reveal(self.local, secret.clone(), Instant::now())?;
        self.transport
            .send(&peer, &ExchangeMessage::Reveal { round_id, party: self.local, secret })
            .await?;

        self.receive_into(&mut round, "reveal").await?;
        let seed = round.seed().ok_or(RoundError::WrongPhase {
            expected: RoundPhase::Combined,
            actual: round.phase(),
        })?;

        info!("Round {:?}: direct exchange with {:?} produced {}", round_id, peer, seed);
        Ok(ExchangeOutcome { round_id, seed, audit: round.audit() })
    }
}
