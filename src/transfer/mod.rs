//! Cross-Shard Transfer
//!
//! Moves value between two accounts that may live on different shards, using
//! one XA branch per participating shard and two-phase commit.
//!
//! # Flow
//!
//! ```text
//! parse ids ─▶ acquire slot ─▶ XA START (all) ─▶ validate ─▶ debit/credit
//!                                  │                │            │
//!                                  ▼                ▼            ▼
//!                             ROLLING_BACK ◀────────┴────────────┤
//!                                  ▲                             ▼
//!                                  └─ XA COMMIT ◀─ XA PREPARE ◀─ XA END (all)
//!                                     (one by one)   (barrier)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single Slot**: at most one global transaction per coordinator
//! 2. **Validate Before Slot**: malformed input never reaches a shard
//! 3. **Prepare Barrier**: no COMMIT before every branch is PREPARED
//! 4. **No Retries**: any failure is terminal and triggers rollback

pub mod api;
pub mod branch;
pub mod coordinator;
pub mod error;
pub mod state;
pub mod types;
pub mod validation;


// Re-exports for convenience
pub use api::{SUCCESS_MSG, TransferApiResponse, TransferErrorBody, parse_amount};
pub use branch::{BranchDriver, BranchState};
pub use coordinator::TransferCoordinator;
pub use error::TransferError;
pub use state::TransactionPhase;
pub use types::{GlobalTransaction, GlobalTxnId, TransferReceipt, TransferRequest};
pub use validation::BalancePolicy;
