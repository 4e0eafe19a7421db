//! Balance Validation Policy
//!
//! Preconditions checked inside the open branches, before any mutation:
//! 1. origin exists
//! 2. destination exists
//! 3. origin balance is strictly greater than the amount
//!
//! The destination's balance is never a precondition.

use std::time::Duration;

use rust_decimal::Decimal;

use super::branch::invoke;
use super::error::TransferError;
use crate::account_id::GlobalAccountId;
use crate::shard::{ResourceManager, ShardOp};

#[derive(Debug, Clone, Copy, Default)]
pub struct BalancePolicy {
    timeout: Option<Duration>,
}

impl BalancePolicy {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn check_exists(
        &self,
        rm: &dyn ResourceManager,
        account: &GlobalAccountId,
    ) -> Result<(), TransferError> {
        let exists = invoke(
            account.shard(),
            ShardOp::AccountExists,
            self.timeout,
            rm.account_exists(account.account()),
        )
        .await?;

        if !exists {
            return Err(TransferError::AccountNotFound(*account));
        }
        Ok(())
    }

    /// A balance exactly equal to `amount` is insufficient.
    pub async fn check_sufficient(
        &self,
        rm: &dyn ResourceManager,
        account: &GlobalAccountId,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        let exceeds = invoke(
            account.shard(),
            ShardOp::BalanceExceeds,
            self.timeout,
            rm.balance_exceeds(account.account(), amount),
        )
        .await?;

        if !exceeds {
            return Err(TransferError::InsufficientFunds {
                account: *account,
                amount,
            });
        }
        Ok(())
    }
}
