//! Dice Rolling
//!
//! Each roll consumes one precommitted leaf. The roller's batch root is on
//! the ledger before the first roll, so the value of roll `i` was fixed in
//! advance and the counterparty checks it with the leaf's inclusion proof.

use std::sync::Arc;
use tracing::debug;

use crate::core::hash::Digest;
use crate::core::rng::DeterministicRng;
use crate::core::secret::{Secret, SecretGenerator};
use crate::ledger::records::{EntryHandle, LeafDisclosure};
use crate::proof::verify::verify_disclosure;
use crate::round::batch_ledger::{BatchError, BatchLedger, IssuedLeaf, LedgerKey};

/// Face value from a leaf secret: uniform in `1..=sides`.
pub fn roll_value(secret: &Secret, sides: u32) -> u32 {
    DeterministicRng::for_purpose(secret.as_bytes(), b"die").next_int_range(1, sides.max(1))
}

/// A roll and the leaf behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DieRoll {
    /// Number of faces.
    pub sides: u32,
    /// Rolled value.
    pub value: u32,
    /// Leaf consumed by the roll.
    pub leaf: IssuedLeaf,
}

impl DieRoll {
    /// Check a disclosed roll against a published batch root.
    pub fn verify(root: &Digest, sides: u32, value: u32, disclosure: &LeafDisclosure) -> bool {
        verify_disclosure(root, disclosure) && roll_value(&disclosure.secret, sides) == value
    }
}

/// Rolls dice from one key's batch sequence.
pub struct DiceRoller<G> {
    ledger: Arc<BatchLedger<G>>,
    key: LedgerKey,
}

impl<G: SecretGenerator> DiceRoller<G> {
    /// Roll from `key`'s batches.
    pub fn new(ledger: Arc<BatchLedger<G>>, key: LedgerKey) -> Self {
        Self { ledger, key }
    }

    /// Roll once. The leaf is consumed; publish it with [`disclose`](Self::disclose).
    pub async fn roll(&self, sides: u32) -> Result<DieRoll, BatchError> {
        let leaf = self.ledger.next_leaf(self.key).await?;
        let value = roll_value(&leaf.secret, sides);
        debug!("Rolled d{} = {} from leaf {} of {:?}", sides, value, leaf.index, leaf.batch_id);
        Ok(DieRoll { sides, value, leaf })
    }

    /// Publish the leaf behind a roll. Safe to repeat after a failure.
    pub fn disclose(&self, roll: &DieRoll) -> Result<Option<EntryHandle>, BatchError> {
        self.ledger.disclose(&roll.leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::core::ids::PartyId;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::core::secret::{OsSecretGenerator, SECRET_LEN};
    use crate::ledger::records::{EntryKind, LedgerEntry, Subject};
    use crate::ledger::sink::{InMemoryLedger, LedgerError, PersistenceSink};

    #[test]
    fn test_roll_value_in_range() {
        for byte in 0..=255u8 {
            let v = roll_value(&Secret::from_bytes([byte; SECRET_LEN]), 6);
            assert!((1..=6).contains(&v));
        }
        assert_eq!(roll_value(&Secret::from_bytes([0; SECRET_LEN]), 0), 1);
    }

    #[tokio::test]
    async fn test_rolls_verify_against_root() {
        let config = ProtocolConfig { batch_size: 4, prefetch_threshold: 0, ..Default::default() };
        let ledger = Arc::new(BatchLedger::new(config, OsSecretGenerator::os()).unwrap());
        let key = LedgerKey::pair(PartyId::new([1; 16]), PartyId::new([2; 16]));
        let root = ledger.open_batch(key).await.unwrap().root;
        let roller = DiceRoller::new(ledger, key);

        for _ in 0..4 {
            let roll = roller.roll(20).await.unwrap();
            assert!(roller.disclose(&roll).unwrap().is_none());
            let disclosure = roll.leaf.disclosure();
            assert!(DieRoll::verify(&root, 20, roll.value, &disclosure));
            assert!(!DieRoll::verify(&root, 20, roll.value % 20 + 1, &disclosure));
        }

        // Fifth roll comes from a new batch
        let roll = roller.roll(20).await.unwrap();
        assert_eq!(roll.leaf.index, 0);
        assert!(!DieRoll::verify(&root, 20, roll.value, &roll.leaf.disclosure()));
        assert!(DieRoll::verify(&roll.leaf.root, 20, roll.value, &roll.leaf.disclosure()));
    }

    /// Sink that is down until switched back on.
    struct Switchable {
        inner: InMemoryLedger,
        down: AtomicBool,
    }

    impl PersistenceSink for Switchable {
        fn publish(&self, entry: LedgerEntry) -> Result<EntryHandle, LedgerError> {
            if entry.kind == EntryKind::LeafDisclosure && self.down.load(Ordering::SeqCst) {
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
    async fn test_failed_disclosure_keeps_roll() {
        let sink = Arc::new(Switchable { inner: InMemoryLedger::new(), down: AtomicBool::new(true) });
        let config = ProtocolConfig { batch_size: 4, prefetch_threshold: 0, ..Default::default() };
        let ledger = Arc::new(BatchLedger::new(config, OsSecretGenerator::os()).unwrap().with_sink(sink.clone()));
        let roller = DiceRoller::new(ledger, LedgerKey::party(PartyId::new([1; 16])));

        let roll = roller.roll(6).await.unwrap();
        assert!(matches!(roller.disclose(&roll), Err(BatchError::Ledger(LedgerError::Unavailable(_)))));

        sink.down.store(false, Ordering::SeqCst);
        assert!(roller.disclose(&roll).unwrap().is_some());

        let published: Vec<LeafDisclosure> = sink
            .entries_for(&Subject::Batch(roll.leaf.batch_id))
            .unwrap()
            .iter()
            .filter(|e| e.kind == EntryKind::LeafDisclosure)
            .map(|e| e.decode().unwrap())
            .collect();
        assert_eq!(published.len(), 1);
        assert!(DieRoll::verify(&roll.leaf.root, 6, roll.value, &published[0]));
    }
}
