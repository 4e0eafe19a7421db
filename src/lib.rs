//! xa_bank - Cross-Shard Transfer Coordinator
//!
//! Moves money between accounts stored on independent database shards with
//! XA two-phase commit.
//!
//! # Modules
//!
//! - [`account_id`] - `<shard>-<account>` identifiers
//! - [`shard`] - Resource manager trait, MySQL and in-memory shards
//! - [`transfer`] - Global transaction slot and XA sequencing
//! - [`gateway`] - HTTP request layer
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod account_id;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod shard;
pub mod transfer;

// Convenient re-exports at crate root
pub use account_id::GlobalAccountId;
pub use shard::{InMemoryShard, MySqlShard, ResourceManager, ShardError, ShardOp, ShardRegistry};
pub use transfer::{
    GlobalTransaction, GlobalTxnId, TransactionPhase, TransferCoordinator, TransferError,
    TransferReceipt,
};
