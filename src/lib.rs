//! # Verirand
//!
//! Verifiable shared randomness from commit-reveal rounds, and Merkle-batched
//! progressive disclosure for high-frequency draws.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        VERIRAND                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives (pure, synchronous)            │
//! │  ├── hash.rs     - Domain-separated SHA-256                  │
//! │  ├── ids.rs      - Party, round and batch identifiers        │
//! │  ├── secret.rs   - Secrets and secure generation             │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  proof/          - Commitments, Merkle batches, combination  │
//! │                                                              │
//! │  round/          - Round state machine, coordinator,         │
//! │                    batch ledger (async)                      │
//! │                                                              │
//! │  exchange/       - Direct (two-party) and published rounds   │
//! │                                                              │
//! │  ledger/         - Sink, transport, event entropy, tokens    │
//! │                                                              │
//! │  apps/           - Card shuffling, dice rolling              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A reveal is never accepted before the same party's commitment.
//! - The combined seed does not depend on reveal order.
//! - A batch root is published before any of its leaves is used.
//! - Anyone holding the published records can recompute every seed and
//!   check every disclosed leaf without contacting a participant.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod apps;
pub mod config;
pub mod core;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod proof;
pub mod round;

// Re-export commonly used types
pub use config::{ConfigError, ProtocolConfig};
pub use core::ids::{BatchId, PartyId, RoundId};
pub use core::rng::DeterministicRng;
pub use core::secret::{OsSecretGenerator, Secret, SecretGenerator};
pub use error::{Error, FailureClass, Result};
pub use exchange::{DirectExchange, ExchangeOutcome, PublishedExchange, SeedExchange};
pub use proof::{combine, commit, verify_leaf, verify_round, CombinedSeed, Commitment, MerkleBatch};
pub use round::{BatchLedger, LedgerKey, RevealCoordinator, RoundPhase, RoundPolicy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
