//! External Collaborators
//!
//! Interfaces to everything outside the core: the append-only ledger, the
//! two-party transport, event entropy, and capability tokens. Each comes
//! with a small in-process implementation.

pub mod capability;
pub mod entropy;
pub mod records;
pub mod sink;
pub mod transport;

pub use capability::{CapabilityScope, CapabilityClaims, CapabilityError, issue_token, validate_token};
pub use entropy::{EntropySource, EventDigestSource, EventEntropy, ObservedEvent, EntropyError};
pub use records::{
    EntryHandle, EntryKind, LedgerEntry, Subject, Visibility,
    RoundManifest, RoundOutcome, FraudRecord, ExternalEntropyRecord,
    BatchRootRecord, LeafDisclosure,
};
pub use sink::{PersistenceSink, InMemoryLedger, LedgerError};
pub use transport::{Transport, ChannelTransport, ExchangeMessage, TransportError};
