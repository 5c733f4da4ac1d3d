//! Rounds and batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ROUND LAYER                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  state.rs         - Single-round commit-reveal machine      │
//! │  coordinator.rs   - Concurrent rounds, deadlines, waiting   │
//! │  batch_ledger.rs  - Per-key leaf issuing and replenishment  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod batch_ledger;
pub mod coordinator;
pub mod state;

pub use batch_ledger::{BatchError, BatchLedger, IssuedLeaf, LedgerKey, SecretBatch};
pub use coordinator::{CoordinatorError, RevealCoordinator};
pub use state::{AbortReason, Round, RoundError, RoundPhase, RoundPolicy};
