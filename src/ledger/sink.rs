//! Persistence Sink
//!
//! Interface to the external append-only ledger, plus an in-memory
//! implementation used by tests, the demo binary and offline audits of
//! exported data.

use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

use crate::core::ids::PartyId;
use crate::ledger::records::{EntryHandle, EntryKind, LedgerEntry, Subject};

/// Append-only store for commitments, roots, reveals and proofs.
pub trait PersistenceSink: Send + Sync {
    /// Store an entry; identical content yields the same handle.
    fn publish(&self, entry: LedgerEntry) -> Result<EntryHandle, LedgerError>;

    /// Retrieve an entry by handle.
    fn fetch(&self, handle: &EntryHandle) -> Result<LedgerEntry, LedgerError>;

    /// All entries keyed by a round or batch, in publication order.
    fn entries_for(&self, subject: &Subject) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No entry under this handle.
    #[error("entry not found: {0:?}")]
    NotFound(EntryHandle),

    /// Record published before the record it depends on.
    #[error("{kind:?} for {subject:?} published before its prerequisite {requires:?}")]
    OrderingViolation {
        /// Kind being published.
        kind: EntryKind,
        /// Round or batch.
        subject: Subject,
        /// Kind that must already exist.
        requires: EntryKind,
    },

    /// Backing store unreachable.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default)]
struct LedgerInner {
    entries: BTreeMap<EntryHandle, LedgerEntry>,
    by_subject: BTreeMap<Subject, Vec<EntryHandle>>,
}

impl LedgerInner {
    fn has(&self, subject: &Subject, kind: EntryKind, author: Option<PartyId>) -> bool {
        self.by_subject
            .get(subject)
            .map(|handles| {
                handles.iter().any(|h| {
                    self.entries
                        .get(h)
                        .map(|e| e.kind == kind && (author.is_none() || e.author == author))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// Commitments and roots must land before anything that opens them.
    fn check_ordering(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let requirement = match entry.kind {
            EntryKind::Commitment | EntryKind::ExternalEntropy | EntryKind::RoundOutcome => {
                Some((EntryKind::RoundManifest, None))
            }
            EntryKind::Reveal | EntryKind::FraudEvidence => {
                Some((EntryKind::Commitment, entry.author))
            }
            EntryKind::LeafDisclosure => Some((EntryKind::BatchRoot, None)),
            EntryKind::RoundManifest | EntryKind::BatchRoot => None,
        };

        match requirement {
            Some((requires, author)) if !self.has(&entry.subject, requires, author) => {
                Err(LedgerError::OrderingViolation {
                    kind: entry.kind,
                    subject: entry.subject,
                    requires,
                })
            }
            _ => Ok(()),
        }
    }
}

/// In-memory ledger.
///
/// Visibility is recorded but not enforced; every entry is readable.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerInner>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    /// True when nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Unavailable("ledger lock poisoned".into())
}

impl PersistenceSink for InMemoryLedger {
    fn publish(&self, entry: LedgerEntry) -> Result<EntryHandle, LedgerError> {
        let handle = entry.address();
        let mut inner = self.inner.write().map_err(poisoned)?;

        if inner.entries.contains_key(&handle) {
            return Ok(handle);
        }
        inner.check_ordering(&entry)?;

        debug!("Published {:?} for {:?} as {:?}", entry.kind, entry.subject, handle);
        inner.by_subject.entry(entry.subject).or_default().push(handle);
        inner.entries.insert(handle, entry);
        Ok(handle)
    }

    fn fetch(&self, handle: &EntryHandle) -> Result<LedgerEntry, LedgerError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.entries.get(handle).cloned().ok_or(LedgerError::NotFound(*handle))
    }

    fn entries_for(&self, subject: &Subject) -> Result<Vec<LedgerEntry>, LedgerError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .by_subject
            .get(subject)
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| inner.entries.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}
