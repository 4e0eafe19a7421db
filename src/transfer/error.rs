//! Transfer Error Types
//!
//! Closed set of failures a transfer can end with. Every variant carries the
//! structured context (account, amount, shard) needed to render it.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::account_id::GlobalAccountId;
use crate::shard::{ShardError, ShardIndex, ShardOp};
use crate::transfer::types::GlobalTxnId;

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors (slot untouched) ===
    #[error("Invalid global account id: '{0}' (expected <shard>-<account>)")]
    InvalidIdentifier(String),

    /// Shard index as written; indexes past the shard type's range are never
    /// registered and land here too
    #[error("Unknown shard: {0}")]
    UnknownShard(String),

    #[error("Invalid amount: '{0}'")]
    InvalidAmount(String),

    #[error("Origin and destination are the same account: {0}")]
    SameAccount(GlobalAccountId),

    // === Coordination ===
    #[error("A transaction is already in effect: {active}")]
    ConcurrentTransaction { active: GlobalTxnId },

    // === Business Preconditions ===
    #[error("Account {0} does not exist")]
    AccountNotFound(GlobalAccountId),

    #[error("Account {account} does not have funds to cover {amount}")]
    InsufficientFunds {
        account: GlobalAccountId,
        amount: Decimal,
    },

    // === Resource Manager ===
    #[error("Shard {shard} failed on {op}: {source}")]
    ResourceManager {
        shard: ShardIndex,
        op: ShardOp,
        #[source]
        source: ShardError,
    },

    /// Some branches committed and a later commit failed; the rest are left
    /// PREPARED for resource-manager recovery
    #[error("Transaction {xid} partially committed (shards {committed:?}); shard {shard} failed on commit: {source}")]
    PartialCommit {
        xid: GlobalTxnId,
        committed: Vec<ShardIndex>,
        shard: ShardIndex,
        #[source]
        source: ShardError,
    },

    /// Undo failed after `cause` aborted the transfer
    #[error("Rollback failed on {} branch(es) after: {cause}", .failures.len())]
    RollbackFailure {
        #[source]
        cause: Box<TransferError>,
        failures: Vec<TransferError>,
    },

    /// The task driving the transaction stopped without an outcome
    #[error("Transaction {xid} stopped before reaching an outcome")]
    Aborted { xid: GlobalTxnId },
}

impl TransferError {
    pub(crate) fn resource_manager(shard: ShardIndex, op: ShardOp, source: ShardError) -> Self {
        TransferError::ResourceManager { shard, op, source }
    }

    /// Variant name, as shown to HTTP clients
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::InvalidIdentifier(_) => "InvalidIdentifier",
            TransferError::UnknownShard(_) => "UnknownShard",
            TransferError::InvalidAmount(_) => "InvalidAmount",
            TransferError::SameAccount(_) => "SameAccount",
            TransferError::ConcurrentTransaction { .. } => "ConcurrentTransactionError",
            TransferError::AccountNotFound(_) => "AccountNotFound",
            TransferError::InsufficientFunds { .. } => "InsufficientFunds",
            TransferError::ResourceManager { .. } => "ResourceManagerError",
            TransferError::PartialCommit { .. } => "PartialCommit",
            TransferError::RollbackFailure { .. } => "RollbackFailure",
            TransferError::Aborted { .. } => "TransactionAborted",
        }
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            TransferError::UnknownShard(_) => "UNKNOWN_SHARD",
            TransferError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransferError::SameAccount(_) => "SAME_ACCOUNT",
            TransferError::ConcurrentTransaction { .. } => "CONCURRENT_TRANSACTION",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::ResourceManager { .. } => "RESOURCE_MANAGER_ERROR",
            TransferError::PartialCommit { .. } => "PARTIAL_COMMIT",
            TransferError::RollbackFailure { .. } => "ROLLBACK_FAILURE",
            TransferError::Aborted { .. } => "TRANSACTION_ABORTED",
        }
    }

    /// Raised before a global transaction exists
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidIdentifier(_)
                | TransferError::UnknownShard(_)
                | TransferError::InvalidAmount(_)
                | TransferError::SameAccount(_)
        )
    }

    /// The error that aborted the transfer, looking through rollback failures
    pub fn root_cause(&self) -> &TransferError {
        match self {
            TransferError::RollbackFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(text: &str) -> GlobalAccountId {
        text.parse().unwrap()
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::UnknownShard("9".into()).code(), "UNKNOWN_SHARD");
        assert_eq!(
            TransferError::AccountNotFound(account("0-1")).code(),
            "ACCOUNT_NOT_FOUND"
        );
        assert_eq!(
            TransferError::ConcurrentTransaction {
                active: GlobalTxnId::new()
            }
            .kind(),
            "ConcurrentTransactionError"
        );
        let aborted = TransferError::Aborted {
            xid: GlobalTxnId::new(),
        };
        assert_eq!(aborted.kind(), "TransactionAborted");
        assert_eq!(aborted.code(), "TRANSACTION_ABORTED");
        assert!(!aborted.is_validation());
    }

    #[test]
    fn test_display() {
        let err = TransferError::InsufficientFunds {
            account: account("0-1"),
            amount: Decimal::new(1_000_000, 0),
        };
        assert_eq!(
            err.to_string(),
            "Account 0-1 does not have funds to cover 1000000"
        );

        let err = TransferError::resource_manager(
            1,
            ShardOp::Prepare,
            ShardError::Unavailable("connection reset".into()),
        );
        assert_eq!(
            err.to_string(),
            "Shard 1 failed on XA PREPARE: resource manager unavailable: connection reset"
        );
    }

    #[test]
    fn test_rollback_failure_keeps_cause() {
        let cause = TransferError::AccountNotFound(account("1-5"));
        let err = TransferError::RollbackFailure {
            cause: Box::new(cause),
            failures: vec![TransferError::resource_manager(
                0,
                ShardOp::Rollback,
                ShardError::Database("lost".into()),
            )],
        };

        assert_eq!(
            err.to_string(),
            "Rollback failed on 1 branch(es) after: Account 1-5 does not exist"
        );
        assert!(matches!(
            err.root_cause(),
            TransferError::AccountNotFound(_)
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_validation_classification() {
        assert!(TransferError::InvalidIdentifier("x".into()).is_validation());
        assert!(TransferError::UnknownShard("3".into()).is_validation());
        assert!(!TransferError::AccountNotFound(account("0-1")).is_validation());
    }
}
