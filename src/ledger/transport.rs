//! Two-Party Transport
//!
//! Carries commitment and reveal messages between exactly two parties.
//! Messages are JSON on the wire. A lost or late message is a liveness
//! problem handled by the caller's timeout, never a protocol violation.

use std::future::Future;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;

use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::proof::commitment::Commitment;

/// Messages exchanged in a direct round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeMessage {
    /// Sender's commitment.
    Commit {
        /// Round identifier.
        round_id: RoundId,
        /// Sender.
        party: PartyId,
        /// Commitment.
        commitment: Commitment,
    },

    /// Sender's reveal.
    Reveal {
        /// Round identifier.
        round_id: RoundId,
        /// Sender.
        party: PartyId,
        /// Secret.
        secret: Secret,
    },
}

impl ExchangeMessage {
    /// Round the message belongs to.
    pub fn round_id(&self) -> RoundId {
        match self {
            Self::Commit { round_id, .. } | Self::Reveal { round_id, .. } => *round_id,
        }
    }

    /// Sending party.
    pub fn party(&self) -> PartyId {
        match self {
            Self::Commit { party, .. } | Self::Reveal { party, .. } => *party,
        }
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Only the bound peer can be addressed.
    #[error("unknown peer {0:?}")]
    UnknownPeer(PartyId),

    /// The other side hung up.
    #[error("transport closed")]
    Closed,

    /// Received bytes did not decode.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Point-to-point link to one peer.
pub trait Transport: Send {
    /// The party on the other end.
    fn peer(&self) -> PartyId;

    /// Send a message to `party` (must be the peer).
    fn send(
        &mut self,
        party: &PartyId,
        message: &ExchangeMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next message.
    fn receive(&mut self) -> impl Future<Output = Result<ExchangeMessage, TransportError>> + Send;
}

/// In-process transport over tokio channels.
pub struct ChannelTransport {
    peer: PartyId,
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

impl ChannelTransport {
    /// Create a connected pair: the first end talks to `b`, the second to `a`.
    pub fn pair(a: PartyId, b: PartyId, capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { peer: b, tx: a_tx, rx: a_rx },
            Self { peer: a, tx: b_tx, rx: b_rx },
        )
    }
}

impl Transport for ChannelTransport {
    fn peer(&self) -> PartyId {
        self.peer
    }

    async fn send(&mut self, party: &PartyId, message: &ExchangeMessage) -> Result<(), TransportError> {
        if *party != self.peer {
            return Err(TransportError::UnknownPeer(*party));
        }
        let json = serde_json::to_string(message)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.tx.send(json).await.map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Result<ExchangeMessage, TransportError> {
        let json = self.rx.recv().await.ok_or(TransportError::Closed)?;
        serde_json::from_str(&json).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}
