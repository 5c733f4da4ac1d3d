//! Batch Ledger
//!
//! Issues precommitted secrets one leaf at a time. Each key (a party, or a
//! party pair) owns a current Merkle batch whose root was published before
//! any of its leaves. When a batch runs out the ledger switches to a fresh
//! one and keeps going from index 0; every issued leaf names the root it
//! belongs to.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ProtocolConfig};
use crate::core::hash::{short_hex, Digest};
use crate::core::ids::{BatchId, PartyId};
use crate::core::secret::{EntropyUnavailable, Secret, SecretGenerator};
use crate::ledger::records::{
    BatchRootRecord, EntryHandle, EntryKind, LeafDisclosure, LedgerEntry, Subject, Visibility,
};
use crate::ledger::sink::{LedgerError, PersistenceSink};
use crate::proof::merkle::{InclusionProof, MerkleBatch, MerkleError};

/// Owner of a batch sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    /// Party generating the secrets.
    pub owner: PartyId,
    /// Counterparty the leaves are disclosed to, if pairwise.
    pub counterparty: Option<PartyId>,
}

impl LedgerKey {
    /// Key for a party acting alone.
    pub const fn party(owner: PartyId) -> Self {
        Self { owner, counterparty: None }
    }

    /// Key for a party disclosing to one counterparty.
    pub const fn pair(owner: PartyId, counterparty: PartyId) -> Self {
        Self { owner, counterparty: Some(counterparty) }
    }
}

/// A leaf handed out by the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedLeaf {
    /// Batch the leaf belongs to.
    pub batch_id: BatchId,
    /// Root the proof verifies against.
    pub root: Digest,
    /// Sequence number of the batch for its key.
    pub sequence: u64,
    /// Leaf index within the batch.
    pub index: usize,
    /// Leaf secret.
    pub secret: Secret,
    /// Path from the leaf to `root`.
    pub proof: InclusionProof,
}

impl IssuedLeaf {
    /// Publishable disclosure record.
    pub fn disclosure(&self) -> LeafDisclosure {
        LeafDisclosure {
            batch_id: self.batch_id,
            index: self.index,
            secret: self.secret.clone(),
            proof: self.proof.clone(),
        }
    }

    /// Check the leaf against its own root.
    pub fn verify(&self) -> bool {
        MerkleBatch::verify_proof(&self.secret, self.index, &self.proof, &self.root)
    }
}

/// Batch ledger errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    /// Every leaf of the batch has been issued.
    #[error("batch {batch_id:?} exhausted after {size} leaves")]
    Exhausted {
        /// Exhausted batch.
        batch_id: BatchId,
        /// Its size.
        size: usize,
    },

    /// Secret generation failed.
    #[error(transparent)]
    Entropy(#[from] EntropyUnavailable),

    /// Tree construction or proof lookup failed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// Publication failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No batches exist for this key.
    #[error("no batches for {0:?}")]
    UnknownKey(LedgerKey),

    /// Batch is not (or no longer) held for this key.
    #[error("unknown batch {0:?}")]
    UnknownBatch(BatchId),

    /// Leaf has not been issued yet and may not be disclosed.
    #[error("leaf {index} of {batch_id:?} has not been issued")]
    LeafNotIssued {
        /// Batch.
        batch_id: BatchId,
        /// Requested index.
        index: usize,
    },
}

/// One batch with its secrets and next-unused index.
pub struct SecretBatch {
    tree: MerkleBatch,
    secrets: Vec<Secret>,
    next_index: usize,
    sequence: u64,
}

impl SecretBatch {
    /// Build a batch from existing secrets.
    pub fn from_secrets(secrets: Vec<Secret>, sequence: u64) -> Result<Self, MerkleError> {
        let tree = MerkleBatch::build(&secrets)?;
        Ok(Self { tree, secrets, next_index: 0, sequence })
    }

    /// Generate `size` fresh secrets and build a batch.
    pub fn generate<G>(generator: &mut G, size: usize, sequence: u64) -> Result<Self, BatchError>
    where
        G: SecretGenerator + ?Sized,
    {
        let secrets = generator.generate(size)?;
        Ok(Self::from_secrets(secrets, sequence)?)
    }

    /// Batch identifier.
    pub fn batch_id(&self) -> BatchId {
        self.tree.batch_id()
    }

    /// Published root.
    pub fn root(&self) -> Digest {
        self.tree.root()
    }

    /// Batch size N.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Always false; empty batches cannot be built.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Index the next call to [`take_next`](Self::take_next) returns.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Leaves not yet issued.
    pub fn remaining(&self) -> usize {
        self.len() - self.next_index
    }

    /// Root record for publication.
    pub fn root_record(&self, key: LedgerKey) -> BatchRootRecord {
        BatchRootRecord {
            batch_id: self.batch_id(),
            key,
            root: self.root(),
            size: self.len(),
            sequence: self.sequence,
        }
    }

    /// Issue the next leaf; fails once `index == N`. Never wraps around.
    pub fn take_next(&mut self) -> Result<IssuedLeaf, BatchError> {
        if self.next_index >= self.len() {
            return Err(BatchError::Exhausted {
                batch_id: self.batch_id(),
                size: self.len(),
            });
        }
        let leaf = self.leaf(self.next_index)?;
        self.next_index += 1;
        Ok(leaf)
    }

    /// Re-issue an already issued leaf.
    pub fn issued_leaf(&self, index: usize) -> Result<IssuedLeaf, BatchError> {
        if index >= self.next_index {
            return Err(BatchError::LeafNotIssued { batch_id: self.batch_id(), index });
        }
        self.leaf(index)
    }

    fn leaf(&self, index: usize) -> Result<IssuedLeaf, BatchError> {
        let proof = self.tree.prove_index(index)?;
        Ok(IssuedLeaf {
            batch_id: self.batch_id(),
            root: self.root(),
            sequence: self.sequence,
            index,
            secret: self.secrets[index].clone(),
            proof,
        })
    }
}

struct KeyState {
    current: SecretBatch,
    pending: Option<SecretBatch>,
    retired: BTreeMap<BatchId, SecretBatch>,
    next_sequence: u64,
}

/// Per-key batch sequencing with automatic replenishment.
pub struct BatchLedger<G> {
    config: ProtocolConfig,
    generator: Mutex<G>,
    keys: RwLock<BTreeMap<LedgerKey, Arc<Mutex<KeyState>>>>,
    sink: Option<Arc<dyn PersistenceSink>>,
    disclosure_visibility: Visibility,
}

impl<G: SecretGenerator> BatchLedger<G> {
    /// Create a ledger that does not publish.
    pub fn new(config: ProtocolConfig, generator: G) -> Result<Self, BatchError> {
        config.validate()?;
        Ok(Self {
            config,
            generator: Mutex::new(generator),
            keys: RwLock::new(BTreeMap::new()),
            sink: None,
            disclosure_visibility: Visibility::Private,
        })
    }

    /// Publish roots and disclosures to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Visibility of published leaf disclosures (private by default).
    pub fn with_disclosure_visibility(mut self, visibility: Visibility) -> Self {
        self.disclosure_visibility = visibility;
        self
    }

    /// Ensure `key` has a batch and return its current root record.
    pub async fn open_batch(&self, key: LedgerKey) -> Result<BatchRootRecord, BatchError> {
        let slot = self.slot(key).await?;
        let state = slot.lock().await;
        Ok(state.current.root_record(key))
    }

    /// Issue the next leaf for `key`, switching batches on exhaustion.
    pub async fn next_leaf(&self, key: LedgerKey) -> Result<IssuedLeaf, BatchError> {
        let slot = self.slot(key).await?;
        let mut state = slot.lock().await;

        let leaf = match state.current.take_next() {
            Ok(leaf) => leaf,
            Err(BatchError::Exhausted { batch_id, size }) => {
                info!("Batch {:?} for {:?} exhausted after {} leaves, rotating", batch_id, key, size);
                self.rotate(key, &mut state).await?;
                state.current.take_next()?
            }
            Err(e) => return Err(e),
        };

        // The leaf is already consumed; a failed prefetch must not lose it.
        if state.pending.is_none() && state.current.remaining() <= self.config.prefetch_threshold {
            let sequence = state.next_sequence;
            match self.fresh_batch(key, sequence).await {
                Ok(batch) => {
                    debug!("Prefetched batch {:?} for {:?}", batch.batch_id(), key);
                    state.next_sequence += 1;
                    state.pending = Some(batch);
                }
                Err(e) => warn!("Prefetch for {:?} failed, retrying on next leaf: {}", key, e),
            }
        }

        Ok(leaf)
    }

    /// Drop exhausted batches of `key` with a sequence below `keep_from_sequence`.
    ///
    /// Their leaves can no longer be re-issued through [`reveal_leaf`](Self::reveal_leaf).
    /// Returns the number of batches dropped.
    pub async fn prune_retired(&self, key: LedgerKey, keep_from_sequence: u64) -> Result<usize, BatchError> {
        let slot = {
            let keys = self.keys.read().await;
            keys.get(&key).cloned().ok_or(BatchError::UnknownKey(key))?
        };
        let mut state = slot.lock().await;

        let before = state.retired.len();
        state.retired.retain(|_, batch| batch.sequence >= keep_from_sequence);
        let dropped = before - state.retired.len();
        if dropped > 0 {
            debug!("Pruned {} retired batches for {:?}", dropped, key);
        }
        Ok(dropped)
    }

    /// Re-issue an already used leaf so it can be disclosed on request.
    ///
    /// Only the current batch and the retained exhausted ones are held;
    /// pruned batches give [`BatchError::UnknownBatch`].
    pub async fn reveal_leaf(
        &self,
        key: LedgerKey,
        batch_id: BatchId,
        index: usize,
    ) -> Result<IssuedLeaf, BatchError> {
        let slot = {
            let keys = self.keys.read().await;
            keys.get(&key).cloned().ok_or(BatchError::UnknownKey(key))?
        };
        let state = slot.lock().await;

        if state.current.batch_id() == batch_id {
            return state.current.issued_leaf(index);
        }
        state
            .retired
            .get(&batch_id)
            .ok_or(BatchError::UnknownBatch(batch_id))?
            .issued_leaf(index)
    }

    /// Publish a leaf disclosure. Returns `None` without a sink.
    pub fn disclose(&self, leaf: &IssuedLeaf) -> Result<Option<EntryHandle>, BatchError> {
        let Some(sink) = &self.sink else {
            return Ok(None);
        };
        let entry = LedgerEntry::new(
            EntryKind::LeafDisclosure,
            self.disclosure_visibility,
            Subject::Batch(leaf.batch_id),
            None,
            &leaf.disclosure(),
        )?;
        Ok(Some(sink.publish(entry)?))
    }

    /// Root records of every batch still held for `key`, oldest first.
    pub async fn roots(&self, key: LedgerKey) -> Result<Vec<BatchRootRecord>, BatchError> {
        let slot = {
            let keys = self.keys.read().await;
            keys.get(&key).cloned().ok_or(BatchError::UnknownKey(key))?
        };
        let state = slot.lock().await;

        let mut roots: Vec<BatchRootRecord> = state
            .retired
            .values()
            .chain(std::iter::once(&state.current))
            .chain(state.pending.iter())
            .map(|b| b.root_record(key))
            .collect();
        roots.sort_by_key(|r| r.sequence);
        Ok(roots)
    }

    async fn slot(&self, key: LedgerKey) -> Result<Arc<Mutex<KeyState>>, BatchError> {
        if let Some(slot) = self.keys.read().await.get(&key) {
            return Ok(slot.clone());
        }

        let mut keys = self.keys.write().await;
        if let Some(slot) = keys.get(&key) {
            return Ok(slot.clone());
        }

        let current = self.fresh_batch(key, 0).await?;
        info!(
            "Opened first batch {:?} for {:?} ({} leaves, root {})",
            current.batch_id(),
            key,
            current.len(),
            short_hex(&current.root())
        );
        let slot = Arc::new(Mutex::new(KeyState {
            current,
            pending: None,
            retired: BTreeMap::new(),
            next_sequence: 1,
        }));
        keys.insert(key, slot.clone());
        Ok(slot)
    }

    async fn rotate(&self, key: LedgerKey, state: &mut KeyState) -> Result<(), BatchError> {
        let next = match state.pending.take() {
            Some(batch) => batch,
            None => {
                let sequence = state.next_sequence;
                let batch = self.fresh_batch(key, sequence).await?;
                state.next_sequence += 1;
                batch
            }
        };
        let old = std::mem::replace(&mut state.current, next);
        state.retired.insert(old.batch_id(), old);

        while state.retired.len() > self.config.retained_batches {
            let oldest = state
                .retired
                .iter()
                .min_by_key(|(_, batch)| batch.sequence)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    state.retired.remove(&id);
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Generate a batch and publish its root before any leaf is used.
    async fn fresh_batch(&self, key: LedgerKey, sequence: u64) -> Result<SecretBatch, BatchError> {
        let batch = {
            let mut generator = self.generator.lock().await;
            SecretBatch::generate(&mut *generator, self.config.batch_size, sequence)?
        };

        if let Some(sink) = &self.sink {
            let entry = LedgerEntry::new(
                EntryKind::BatchRoot,
                Visibility::Public,
                Subject::Batch(batch.batch_id()),
                Some(key.owner),
                &batch.root_record(key),
            )?;
            sink.publish(entry)?;
        }
        Ok(batch)
    }
}
