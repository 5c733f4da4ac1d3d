//! Reveal Coordinator
//!
//! Runs many commit-reveal rounds side by side. Each round sits behind its
//! own mutex so a slow or stalled round never blocks another; the round
//! table itself is only locked to look a round up.
//!
//! Every accepted record is pushed to the persistence sink as it happens, so
//! an aborted round still leaves its partial commitments and reveals on the
//! ledger. A submission only takes effect once its record is published; if
//! the sink fails the round is left as it was and the call can be retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::core::ids::{PartyId, RoundId};
use crate::core::secret::Secret;
use crate::ledger::entropy::EventEntropy;
use crate::ledger::records::{
    EntryKind, ExternalEntropyRecord, LedgerEntry, RoundOutcome, Subject, Visibility,
};
use crate::ledger::sink::{LedgerError, PersistenceSink};
use crate::proof::combiner::CombinedSeed;
use crate::proof::commitment::{Commitment, CommitmentRecord, RevealRecord};
use crate::proof::verify::RoundAudit;
use crate::round::state::{Round, RoundError, RoundPhase, RoundPolicy};

/// Coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// The round rejected the submission.
    #[error(transparent)]
    Round(#[from] RoundError),

    /// The round advanced but its record could not be published.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

struct SlotState {
    round: Round,
    outcome_published: bool,
}

struct RoundSlot {
    state: Mutex<SlotState>,
    deadline: Instant,
    phase_tx: watch::Sender<RoundPhase>,
}

impl RoundSlot {
    fn notify(&self, phase: RoundPhase) {
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }
}

/// Multi-round commit-reveal coordinator.
pub struct RevealCoordinator {
    config: ProtocolConfig,
    rounds: RwLock<BTreeMap<RoundId, Arc<RoundSlot>>>,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl RevealCoordinator {
    /// Create a coordinator that keeps records in memory only.
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            rounds: RwLock::new(BTreeMap::new()),
            sink: None,
        }
    }

    /// Publish every round record to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Open a round; its deadline is now plus `round_timeout`.
    pub async fn open_round<I>(&self, participants: I, policy: RoundPolicy) -> Result<RoundId, CoordinatorError>
    where
        I: IntoIterator<Item = PartyId>,
    {
        let round_id = RoundId::random();
        let deadline = Instant::now() + self.config.round_timeout;
        let round = Round::new(round_id, participants, policy, deadline)?;

        self.publish(
            EntryKind::RoundManifest,
            round_id,
            None,
            round.manifest(),
        )?;
        info!(
            "Opened round {:?} with {} participants, policy {:?}",
            round_id,
            round.manifest().participants.len(),
            policy
        );

        let (phase_tx, _) = watch::channel(round.phase());
        let slot = Arc::new(RoundSlot {
            state: Mutex::new(SlotState { round, outcome_published: false }),
            deadline,
            phase_tx,
        });

        let mut rounds = self.rounds.write().await;
        rounds.insert(round_id, slot);
        Ok(round_id)
    }

    /// Record a commitment.
    pub async fn submit_commitment(
        &self,
        round_id: RoundId,
        party: PartyId,
        commitment: Commitment,
    ) -> Result<RoundPhase, CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let mut state = slot.state.lock().await;

        // Applied to a copy; kept only once its record is on the ledger
        let mut next = state.round.clone();
        let result = next.submit_commitment(party, commitment, Instant::now());
        if result.is_ok() {
            let record = CommitmentRecord { round_id, party, commitment };
            self.publish(EntryKind::Commitment, round_id, Some(party), &record)?;
        }
        state.round = next;
        self.settle(&slot, &mut state)?;
        Ok(result?)
    }

    /// Record a reveal. A mismatching reveal is kept as fraud evidence.
    pub async fn submit_reveal(
        &self,
        round_id: RoundId,
        party: PartyId,
        secret: Secret,
    ) -> Result<RoundPhase, CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let mut state = slot.state.lock().await;

        let fraud_before = state.round.fraud_evidence().len();
        let mut next = state.round.clone();
        let result = next.submit_reveal(party, secret.clone(), Instant::now());

        if result.is_ok() {
            let record = RevealRecord::new(round_id, party, secret);
            self.publish(EntryKind::Reveal, round_id, Some(party), &record)?;
        }
        for evidence in &next.fraud_evidence()[fraud_before..] {
            self.publish(EntryKind::FraudEvidence, round_id, Some(evidence.party), evidence)?;
        }
        state.round = next;

        self.settle(&slot, &mut state)?;
        Ok(result?)
    }

    /// Fold event-derived entropy into a round still collecting commitments.
    pub async fn add_external_entropy(
        &self,
        round_id: RoundId,
        entropy: EventEntropy,
    ) -> Result<(), CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let mut state = slot.state.lock().await;

        let mut next = state.round.clone();
        let result = next.add_external_entropy(entropy, Instant::now());
        if result.is_ok() {
            let record = ExternalEntropyRecord { round_id, entropy };
            self.publish(EntryKind::ExternalEntropy, round_id, None, &record)?;
        }
        state.round = next;
        self.settle(&slot, &mut state)?;
        Ok(result?)
    }

    /// Abort a round on request.
    pub async fn cancel(&self, round_id: RoundId) -> Result<(), CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let mut state = slot.state.lock().await;
        state.round.cancel();
        self.settle(&slot, &mut state)
    }

    /// Abort every round past its deadline. Returns the rounds aborted.
    pub async fn expire_overdue(&self) -> Result<Vec<RoundId>, CoordinatorError> {
        let slots: Vec<(RoundId, Arc<RoundSlot>)> = {
            let rounds = self.rounds.read().await;
            rounds.iter().map(|(id, slot)| (*id, slot.clone())).collect()
        };

        let now = Instant::now();
        let mut expired = Vec::new();
        for (round_id, slot) in slots {
            let mut state = slot.state.lock().await;
            if state.round.check_deadline(now) {
                expired.push(round_id);
            }
            self.settle(&slot, &mut state)?;
        }

        if !expired.is_empty() {
            info!("Expired {} overdue rounds", expired.len());
        }
        Ok(expired)
    }

    /// Current phase.
    pub async fn phase(&self, round_id: RoundId) -> Result<RoundPhase, CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let state = slot.state.lock().await;
        Ok(state.round.phase())
    }

    /// Seed, once combined.
    pub async fn seed(&self, round_id: RoundId) -> Result<Option<CombinedSeed>, CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let state = slot.state.lock().await;
        Ok(state.round.seed())
    }

    /// Terminal outcome, if reached.
    pub async fn outcome(&self, round_id: RoundId) -> Result<Option<RoundOutcome>, CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let state = slot.state.lock().await;
        Ok(state.round.outcome())
    }

    /// Everything recorded for a round so far, including partial reveals.
    pub async fn audit(&self, round_id: RoundId) -> Result<RoundAudit, CoordinatorError> {
        let slot = self.slot(round_id).await?;
        let state = slot.state.lock().await;
        Ok(state.round.audit())
    }

    /// Suspend until `predicate` holds for the round's phase.
    ///
    /// If the deadline passes first the round is expired and its terminal
    /// phase is returned, whether or not it satisfies `predicate`.
    pub async fn wait_for<F>(&self, round_id: RoundId, mut predicate: F) -> Result<RoundPhase, CoordinatorError>
    where
        F: FnMut(RoundPhase) -> bool,
    {
        let slot = self.slot(round_id).await?;
        let mut rx = slot.phase_tx.subscribe();

        let waited = tokio::time::timeout_at(slot.deadline, rx.wait_for(|phase| predicate(*phase)))
            .await
            .map(|r| r.map(|phase| *phase));

        match waited {
            Ok(Ok(phase)) => Ok(phase),
            Ok(Err(_)) => Ok(*rx.borrow()),
            Err(_) => {
                let mut state = slot.state.lock().await;
                state.round.check_deadline(Instant::now());
                self.settle(&slot, &mut state)?;
                Ok(state.round.phase())
            }
        }
    }

    /// Suspend until the round is combined or aborted.
    pub async fn wait_outcome(&self, round_id: RoundId) -> Result<RoundOutcome, CoordinatorError> {
        let phase = self.wait_for(round_id, |phase| phase.is_terminal()).await?;
        self.outcome(round_id).await?.ok_or(CoordinatorError::Round(RoundError::WrongPhase {
            expected: RoundPhase::Combined,
            actual: phase,
        }))
    }

    /// Number of tracked rounds.
    pub async fn round_count(&self) -> usize {
        let rounds = self.rounds.read().await;
        rounds.len()
    }

    /// Forget terminal rounds. Their records stay on the ledger.
    pub async fn prune_finished(&self) -> usize {
        let mut rounds = self.rounds.write().await;
        let mut to_remove = Vec::new();

        for (id, slot) in rounds.iter() {
            let state = slot.state.lock().await;
            if state.round.phase().is_terminal() {
                to_remove.push(*id);
            }
        }

        for id in &to_remove {
            rounds.remove(id);
        }
        debug!("Pruned {} finished rounds", to_remove.len());
        to_remove.len()
    }

    async fn slot(&self, round_id: RoundId) -> Result<Arc<RoundSlot>, RoundError> {
        let rounds = self.rounds.read().await;
        rounds.get(&round_id).cloned().ok_or(RoundError::UnknownRound(round_id))
    }

    /// Publish the outcome once and wake waiters.
    fn settle(&self, slot: &RoundSlot, state: &mut SlotState) -> Result<(), CoordinatorError> {
        let phase = state.round.phase();
        if phase.is_terminal() && !state.outcome_published {
            if let Some(outcome) = state.round.outcome() {
                let round_id = state.round.id();
                if let Err(e) = self.publish(EntryKind::RoundOutcome, round_id, None, &outcome) {
                    warn!("Round {:?}: outcome not published: {}", round_id, e);
                    slot.notify(phase);
                    return Err(e.into());
                }
                state.outcome_published = true;
            }
        }
        slot.notify(phase);
        Ok(())
    }

    fn publish<T: serde::Serialize>(
        &self,
        kind: EntryKind,
        round_id: RoundId,
        author: Option<PartyId>,
        payload: &T,
    ) -> Result<(), LedgerError> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        let entry = LedgerEntry::new(kind, Visibility::Public, Subject::Round(round_id), author, payload)?;
        let handle = sink.publish(entry)?;
        debug!("Round {:?}: published {:?} as {:?}", round_id, kind, handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use crate::core::secret::SECRET_LEN;
    use crate::ledger::records::EntryHandle;
    use crate::ledger::sink::InMemoryLedger;
    use crate::proof::combiner::combine;
    use crate::proof::commitment::commit;
    use crate::proof::verify::verify_round;
    use crate::round::state::AbortReason;

    const A: PartyId = PartyId::new([0xa; 16]);
    const B: PartyId = PartyId::new([0xb; 16]);
    const C: PartyId = PartyId::new([0xc; 16]);

    fn secret(byte: u8) -> Secret {
        Secret::from_bytes([byte; SECRET_LEN])
    }

    fn coordinator(timeout_secs: u64) -> (RevealCoordinator, Arc<InMemoryLedger>) {
        let sink = Arc::new(InMemoryLedger::new());
        let config = ProtocolConfig {
            round_timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        };
        (RevealCoordinator::new(config).with_sink(sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_round_publishes_verifiable_records() {
        let (coord, sink) = coordinator(30);
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();

        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();
        assert_eq!(
            coord.submit_commitment(round, B, commit(&secret(2))).await.unwrap(),
            RoundPhase::AwaitingReveal
        );
        coord.submit_reveal(round, B, secret(2)).await.unwrap();
        assert_eq!(coord.submit_reveal(round, A, secret(1)).await.unwrap(), RoundPhase::Combined);

        let seed = coord.seed(round).await.unwrap().unwrap();
        assert_eq!(seed, combine(&[secret(1), secret(2)]));

        let audit = RoundAudit::fetch(sink.as_ref(), round).unwrap();
        assert_eq!(verify_round(round, &audit).unwrap(), seed);

        let entries = sink.entries_for(&Subject::Round(round)).unwrap();
        assert!(entries.iter().any(|e| e.kind == EntryKind::RoundOutcome));
    }

    /// Refuses the next `refuse` publishes of one entry kind.
    struct Refusing {
        inner: InMemoryLedger,
        kind: EntryKind,
        refuse: AtomicUsize,
    }

    impl Refusing {
        fn new(kind: EntryKind) -> Self {
            Self { inner: InMemoryLedger::new(), kind, refuse: AtomicUsize::new(0) }
        }
    }

    impl PersistenceSink for Refusing {
        fn publish(&self, entry: LedgerEntry) -> Result<EntryHandle, LedgerError> {
            let refused = entry.kind == self.kind
                && self.refuse.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
            if refused {
                return Err(LedgerError::Unavailable("sink offline".into()));
            }
            self.inner.publish(entry)
        }

        fn fetch(&self, handle: &EntryHandle) -> Result<LedgerEntry, LedgerError> {
            self.inner.fetch(handle)
        }

        fn entries_for(&self, subject: &Subject) -> Result<Vec<LedgerEntry>, LedgerError> {
            self.inner.entries_for(subject)
        }
    }

    #[tokio::test]
    async fn test_unpublished_reveal_can_be_retried() {
        let sink = Arc::new(Refusing::new(EntryKind::Reveal));
        let coord = RevealCoordinator::new(ProtocolConfig::default()).with_sink(sink.clone());
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();
        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();
        coord.submit_commitment(round, B, commit(&secret(2))).await.unwrap();
        coord.submit_reveal(round, A, secret(1)).await.unwrap();

        sink.refuse.store(1, Ordering::SeqCst);
        let err = coord.submit_reveal(round, B, secret(2)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Ledger(LedgerError::Unavailable(_))));

        // The round did not move without the record
        assert_eq!(coord.phase(round).await.unwrap(), RoundPhase::AwaitingReveal);
        assert_eq!(coord.seed(round).await.unwrap(), None);

        assert_eq!(coord.submit_reveal(round, B, secret(2)).await.unwrap(), RoundPhase::Combined);
        let seed = coord.seed(round).await.unwrap().unwrap();
        let audit = RoundAudit::fetch(sink.as_ref(), round).unwrap();
        assert_eq!(verify_round(round, &audit).unwrap(), seed);
    }

    #[tokio::test]
    async fn test_unpublished_commitment_can_be_retried() {
        let sink = Arc::new(Refusing::new(EntryKind::Commitment));
        let coord = RevealCoordinator::new(ProtocolConfig::default()).with_sink(sink.clone());
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();

        sink.refuse.store(1, Ordering::SeqCst);
        assert!(coord.submit_commitment(round, A, commit(&secret(1))).await.is_err());
        assert_eq!(coord.audit(round).await.unwrap().commitments.len(), 0);

        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();
        coord.submit_commitment(round, B, commit(&secret(2))).await.unwrap();
        coord.submit_reveal(round, A, secret(1)).await.unwrap();
        coord.submit_reveal(round, B, secret(2)).await.unwrap();

        let audit = RoundAudit::fetch(sink.as_ref(), round).unwrap();
        assert_eq!(verify_round(round, &audit).unwrap(), coord.seed(round).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_round() {
        let (coord, _) = coordinator(30);
        let missing = RoundId::new([9; 16]);
        assert_eq!(
            coord.phase(missing).await.unwrap_err(),
            CoordinatorError::Round(RoundError::UnknownRound(missing))
        );
    }

    #[tokio::test]
    async fn test_reveal_before_commit_not_published() {
        let (coord, sink) = coordinator(30);
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();
        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();

        assert_eq!(
            coord.submit_reveal(round, B, secret(2)).await.unwrap_err(),
            CoordinatorError::Round(RoundError::RevealBeforeCommitment(B))
        );
        let entries = sink.entries_for(&Subject::Round(round)).unwrap();
        assert!(entries.iter().all(|e| e.kind != EntryKind::Reveal));
    }

    #[tokio::test]
    async fn test_fraud_evidence_published_and_excluded() {
        let (coord, sink) = coordinator(30);
        let round = coord.open_round([A, B, C], RoundPolicy::Threshold { k: 2 }).await.unwrap();
        for (party, byte) in [(A, 1), (B, 2), (C, 3)] {
            coord.submit_commitment(round, party, commit(&secret(byte))).await.unwrap();
        }

        assert_eq!(
            coord.submit_reveal(round, A, secret(77)).await.unwrap_err(),
            CoordinatorError::Round(RoundError::CommitmentMismatch { party: A })
        );
        coord.submit_reveal(round, B, secret(2)).await.unwrap();
        coord.submit_reveal(round, C, secret(3)).await.unwrap();

        let seed = coord.seed(round).await.unwrap().unwrap();
        assert_eq!(seed, combine(&[secret(2), secret(3)]));

        let entries = sink.entries_for(&Subject::Round(round)).unwrap();
        let fraud: Vec<_> = entries.iter().filter(|e| e.kind == EntryKind::FraudEvidence).collect();
        assert_eq!(fraud.len(), 1);
        assert_eq!(fraud[0].author, Some(A));

        let audit = RoundAudit::fetch(sink.as_ref(), round).unwrap();
        assert_eq!(verify_round(round, &audit).unwrap(), seed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_round_expires_with_partial_reveals() {
        let (coord, sink) = coordinator(5);
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();
        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();
        coord.submit_commitment(round, B, commit(&secret(2))).await.unwrap();
        coord.submit_reveal(round, A, secret(1)).await.unwrap();

        assert!(coord.expire_overdue().await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(coord.expire_overdue().await.unwrap(), vec![round]);

        assert!(matches!(
            coord.outcome(round).await.unwrap(),
            Some(RoundOutcome::Aborted { reason: AbortReason::Timeout { reveals: 1, .. }, .. })
        ));

        let audit = RoundAudit::fetch(sink.as_ref(), round).unwrap();
        assert_eq!(audit.reveals.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_isolated_per_round() {
        let (coord, _) = coordinator(5);
        let stalled = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        let fresh = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(coord.expire_overdue().await.unwrap(), vec![stalled]);
        assert_eq!(coord.phase(fresh).await.unwrap(), RoundPhase::Open);
    }

    #[tokio::test]
    async fn test_wait_outcome_wakes_on_combine() {
        let (coord, _) = coordinator(30);
        let coord = Arc::new(coord);
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.wait_outcome(round).await })
        };

        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();
        coord.submit_commitment(round, B, commit(&secret(2))).await.unwrap();
        coord.submit_reveal(round, A, secret(1)).await.unwrap();
        coord.submit_reveal(round, B, secret(2)).await.unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert!(matches!(outcome, RoundOutcome::Combined { ref contributors, .. } if contributors.len() == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_outcome_times_out() {
        let (coord, _) = coordinator(5);
        let round = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();
        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();

        let outcome = coord.wait_outcome(round).await.unwrap();
        assert!(matches!(
            outcome,
            RoundOutcome::Aborted { reason: AbortReason::Timeout { commitments: 1, .. }, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_and_prune() {
        let (coord, _) = coordinator(30);
        let done = coord.open_round([A], RoundPolicy::AllOf).await.unwrap();
        let live = coord.open_round([A, B], RoundPolicy::AllOf).await.unwrap();

        coord.cancel(done).await.unwrap();
        assert_eq!(coord.phase(done).await.unwrap(), RoundPhase::Aborted);
        assert_eq!(coord.prune_finished().await, 1);
        assert_eq!(coord.round_count().await, 1);
        assert_eq!(coord.phase(live).await.unwrap(), RoundPhase::Open);
    }

    #[tokio::test]
    async fn test_external_entropy_recorded() {
        let (coord, sink) = coordinator(30);
        let round = coord.open_round([A], RoundPolicy::AllOf).await.unwrap();
        coord.add_external_entropy(round, EventEntropy([7; 32])).await.unwrap();
        coord.submit_commitment(round, A, commit(&secret(1))).await.unwrap();
        coord.submit_reveal(round, A, secret(1)).await.unwrap();

        let audit = RoundAudit::fetch(sink.as_ref(), round).unwrap();
        assert_eq!(audit.external_entropy, vec![EventEntropy([7; 32])]);
        assert_eq!(verify_round(round, &audit).unwrap(), coord.seed(round).await.unwrap().unwrap());
    }
}
