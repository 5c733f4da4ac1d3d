//! Event-Derived Entropy
//!
//! Secondary entropy drawn from unpredictable but later-verifiable network
//! events (gossip timestamps, validation signatures). The result may be fed
//! to the combiner next to committed secrets; it does not replace them.

use std::future::Future;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Serialize, Deserialize};

use crate::core::hash::{Digest, DomainHasher, EVENT_ENTROPY_DOMAIN, digests_equal};
use crate::core::ids::PartyId;

/// One observed network event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEvent {
    /// When the event was seen.
    pub observed_at: DateTime<Utc>,
    /// Node the event came from.
    pub origin: PartyId,
    /// Raw event bytes (signature, header, ...).
    pub payload: Vec<u8>,
}

/// Digest of a set of observed events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventEntropy(pub Digest);

impl EventEntropy {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

/// Errors from an entropy source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntropyError {
    /// The stream ended before enough events arrived.
    #[error("observed {have} events, need at least {need}")]
    TooFewEvents {
        /// Events seen.
        have: usize,
        /// Events required.
        need: usize,
    },
}

/// Pluggable source of event entropy.
pub trait EntropySource {
    /// Consume an event stream and condense it.
    fn observe<S>(&mut self, events: S) -> impl Future<Output = Result<EventEntropy, EntropyError>> + Send
    where
        S: Stream<Item = ObservedEvent> + Send + Unpin;
}

/// Hashes a bounded window of events in canonical order.
#[derive(Debug, Clone)]
pub struct EventDigestSource {
    /// Minimum events before a digest is produced.
    pub min_events: usize,
    /// Stop reading after this many events.
    pub max_events: usize,
}

impl Default for EventDigestSource {
    fn default() -> Self {
        Self {
            min_events: 3,
            max_events: 64,
        }
    }
}

impl EntropySource for EventDigestSource {
    async fn observe<S>(&mut self, events: S) -> Result<EventEntropy, EntropyError>
    where
        S: Stream<Item = ObservedEvent> + Send + Unpin,
    {
        let collected: Vec<ObservedEvent> = events.take(self.max_events).collect().await;
        if collected.len() < self.min_events {
            return Err(EntropyError::TooFewEvents {
                have: collected.len(),
                need: self.min_events,
            });
        }
        Ok(digest_events(&collected))
    }
}

/// Digest events independent of arrival order.
pub fn digest_events(events: &[ObservedEvent]) -> EventEntropy {
    let mut sorted: Vec<&ObservedEvent> = events.iter().collect();
    sorted.sort_by(|a, b| {
        a.observed_at
            .cmp(&b.observed_at)
            .then_with(|| a.origin.cmp(&b.origin))
            .then_with(|| a.payload.cmp(&b.payload))
    });

    let mut hasher = DomainHasher::new(EVENT_ENTROPY_DOMAIN);
    hasher.update_u64(sorted.len() as u64);
    for event in sorted {
        hasher.update_u64(event.observed_at.timestamp_micros() as u64);
        hasher.update_id(event.origin.as_bytes());
        hasher.update_prefixed(&event.payload);
    }
    EventEntropy(hasher.finalize())
}

/// Recompute an entropy value from the published events.
pub fn verify_observation(events: &[ObservedEvent], entropy: &EventEntropy) -> bool {
    digests_equal(&digest_events(events).0, &entropy.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures_util::stream;

    fn event(secs: i64, origin: u8, payload: &[u8]) -> ObservedEvent {
        ObservedEvent {
            observed_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            origin: PartyId::new([origin; 16]),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_observe_digests_stream() {
        let events = vec![event(1, 1, b"a"), event(2, 2, b"b"), event(3, 3, b"c")];
        let mut source = EventDigestSource::default();

        let entropy = source.observe(stream::iter(events.clone())).await.unwrap();
        assert!(verify_observation(&events, &entropy));
    }

    #[tokio::test]
    async fn test_too_few_events() {
        let mut source = EventDigestSource { min_events: 5, max_events: 10 };
        let result = source.observe(stream::iter(vec![event(1, 1, b"a")])).await;
        assert_eq!(result, Err(EntropyError::TooFewEvents { have: 1, need: 5 }));
    }

    #[test]
    fn test_arrival_order_irrelevant() {
        let a = vec![event(1, 1, b"a"), event(2, 2, b"b")];
        let b = vec![event(2, 2, b"b"), event(1, 1, b"a")];
        assert_eq!(digest_events(&a), digest_events(&b));
    }

    #[test]
    fn test_tampered_event_detected() {
        let events = vec![event(1, 1, b"a"), event(2, 2, b"b")];
        let entropy = digest_events(&events);

        let mut tampered = events.clone();
        tampered[1].payload = b"x".to_vec();
        assert!(!verify_observation(&tampered, &entropy));
    }
}
