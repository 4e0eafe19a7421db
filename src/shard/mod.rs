//! Shard Resource Managers
//!
//! Each shard ("agency") is an independently owned account store that can run
//! its own branch of a distributed XA transaction. The coordinator only talks
//! to shards through the [`ResourceManager`] trait.
//!
//! Implementations:
//! - [`MySqlShard`]: one long-lived MySQL connection issuing `XA ...` statements
//! - [`InMemoryShard`]: in-process store with the same branch state rules

pub mod memory;
pub mod mysql;

pub use memory::{BranchGate, InMemoryShard};
pub use mysql::MySqlShard;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::ShardConfig;
use crate::transfer::types::GlobalTxnId;

/// Local account id inside one shard
pub type LocalAccountId = u64;

/// Shard index as written in a global account id
pub type ShardIndex = u32;

/// Resource-manager level failure (network, driver, XA protocol)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("database error: {0}")]
    Database(String),

    #[error("XA protocol violation: {0}")]
    Protocol(String),

    /// XAER_NOTA: the shard holds no branch with this XID
    #[error("unknown XID: {0}")]
    UnknownXid(String),

    #[error("resource manager unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for ShardError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ShardError::Unavailable(e.to_string())
            }
            // ER_XAER_NOTA (1397)
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some(XAER_NOTA_SQLSTATE) => {
                ShardError::UnknownXid(db.message().to_string())
            }
            _ => ShardError::Database(e.to_string()),
        }
    }
}

const XAER_NOTA_SQLSTATE: &str = "XAE04";

/// Operations a shard can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardOp {
    Start,
    End,
    Prepare,
    Commit,
    Rollback,
    AccountExists,
    BalanceExceeds,
    Debit,
    Credit,
}

impl ShardOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardOp::Start => "XA START",
            ShardOp::End => "XA END",
            ShardOp::Prepare => "XA PREPARE",
            ShardOp::Commit => "XA COMMIT",
            ShardOp::Rollback => "XA ROLLBACK",
            ShardOp::AccountExists => "ACCOUNT EXISTS",
            ShardOp::BalanceExceeds => "BALANCE EXCEEDS",
            ShardOp::Debit => "DEBIT",
            ShardOp::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for ShardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability surface the coordinator needs from one shard.
///
/// Data operations run inside whatever branch is open on the shard's
/// connection; they have no undo of their own, rollback only happens through
/// [`ResourceManager::rollback_branch`].
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    async fn begin_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError>;

    async fn end_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError>;

    async fn prepare_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError>;

    async fn commit_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError>;

    async fn rollback_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError>;

    async fn account_exists(&self, account: LocalAccountId) -> Result<bool, ShardError>;

    /// Strictly greater-than: a balance equal to `amount` returns `false`.
    async fn balance_exceeds(
        &self,
        account: LocalAccountId,
        amount: Decimal,
    ) -> Result<bool, ShardError>;

    async fn debit(&self, account: LocalAccountId, amount: Decimal) -> Result<(), ShardError>;

    async fn credit(&self, account: LocalAccountId, amount: Decimal) -> Result<(), ShardError>;
}

/// Registered shards, addressed by index
#[derive(Clone, Default)]
pub struct ShardRegistry {
    shards: Vec<Arc<dyn ResourceManager>>,
}

impl ShardRegistry {
    pub fn new(shards: Vec<Arc<dyn ResourceManager>>) -> Self {
        Self { shards }
    }

    /// Open every configured shard. MySQL shards connect eagerly.
    pub async fn connect(configs: &[ShardConfig]) -> anyhow::Result<Self> {
        let mut shards: Vec<Arc<dyn ResourceManager>> = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let shard: Arc<dyn ResourceManager> = match config {
                ShardConfig::Mysql(mysql) => {
                    Arc::new(MySqlShard::connect(index as ShardIndex, mysql).await?)
                }
                ShardConfig::Memory(memory) => Arc::new(InMemoryShard::with_accounts(
                    format!("memory-{}", index),
                    memory.accounts.clone(),
                )),
            };
            tracing::info!(shard = index, name = shard.name(), "Shard registered");
            shards.push(shard);
        }
        Ok(Self { shards })
    }

    pub fn get(&self, index: ShardIndex) -> Option<&Arc<dyn ResourceManager>> {
        self.shards.get(index as usize)
    }

    pub fn contains(&self, index: ShardIndex) -> bool {
        (index as usize) < self.shards.len()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl fmt::Debug for ShardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.shards.iter().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ShardRegistry::new(vec![
            Arc::new(InMemoryShard::new("a")),
            Arc::new(InMemoryShard::new("b")),
        ]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(1));
        assert!(!registry.contains(2));
        assert_eq!(registry.get(1).map(|s| s.name()), Some("b"));
        assert!(registry.get(9).is_none());
    }

    #[tokio::test]
    async fn test_connect_memory_shards() {
        let configs = vec![
            ShardConfig::Memory(Default::default()),
            ShardConfig::Memory(Default::default()),
        ];
        let registry = ShardRegistry::connect(&configs).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(0).map(|s| s.name()), Some("memory-0"));
    }

    #[test]
    fn test_op_display() {
        assert_eq!(ShardOp::Prepare.to_string(), "XA PREPARE");
        assert_eq!(ShardOp::BalanceExceeds.to_string(), "BALANCE EXCEEDS");
    }
}
