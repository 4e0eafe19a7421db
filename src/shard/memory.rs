//! In-Memory Resource Manager
//!
//! Keeps committed balances in RAM and tracks XA branches with the same state
//! rules a MySQL connection enforces:
//!
//! ```text
//! (none) --START--> ACTIVE --END--> IDLE --PREPARE--> PREPARED --COMMIT--> (applied)
//!                                     |                   |
//!                                     +-----ROLLBACK------+--> (discarded)
//! ```
//!
//! Writes made inside a branch are buffered as deltas and only become visible
//! to other branches on commit. Like a single connection, at most one branch
//! can be ACTIVE at a time.
//!
//! Test hooks: per-operation fault injection, call counters, artificial
//! latency and a one-shot [`BranchGate`] that parks the next `XA START`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use super::{LocalAccountId, ResourceManager, ShardError, ShardOp};
use crate::transfer::types::GlobalTxnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XaState {
    Active,
    Idle,
    Prepared,
}

#[derive(Debug)]
struct Branch {
    state: XaState,
    deltas: BTreeMap<LocalAccountId, Decimal>,
}

#[derive(Default)]
struct Inner {
    balances: BTreeMap<LocalAccountId, Decimal>,
    branches: HashMap<GlobalTxnId, Branch>,
    /// Branch attached to the connection (ACTIVE)
    attached: Option<GlobalTxnId>,
    faults: HashSet<ShardOp>,
    calls: HashMap<ShardOp, usize>,
    gate: Option<Arc<BranchGate>>,
}

impl Inner {
    /// Balance as seen by the attached branch
    fn visible_balance(&self, account: LocalAccountId) -> Result<Option<Decimal>, ShardError> {
        let Some(&committed) = self.balances.get(&account) else {
            return Ok(None);
        };
        let pending = self
            .attached
            .and_then(|xid| self.branches.get(&xid))
            .and_then(|b| b.deltas.get(&account).copied())
            .unwrap_or_default();
        committed
            .checked_add(pending)
            .map(Some)
            .ok_or_else(|| out_of_range(account))
    }

    fn apply(&mut self, account: LocalAccountId, delta: Decimal) -> Result<(), ShardError> {
        // UPDATE ... WHERE id = ? matching no row
        let Some(current) = self.visible_balance(account)? else {
            return Ok(());
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| out_of_range(account))?;

        match self.attached.and_then(|xid| self.branches.get_mut(&xid)) {
            Some(branch) => {
                let pending = branch.deltas.entry(account).or_default();
                *pending = pending
                    .checked_add(delta)
                    .ok_or_else(|| out_of_range(account))?;
            }
            // No branch open: autocommit
            None => {
                self.balances.insert(account, next);
            }
        }
        Ok(())
    }

    fn branch_in(
        &mut self,
        xid: &GlobalTxnId,
        expected: &[XaState],
    ) -> Result<&mut Branch, ShardError> {
        let branch = self
            .branches
            .get_mut(xid)
            .ok_or_else(|| ShardError::UnknownXid(xid.to_string()))?;
        if !expected.contains(&branch.state) {
            return Err(ShardError::Protocol(format!(
                "XAER_RMFAIL: branch {} is in {:?} state",
                xid, branch.state
            )));
        }
        Ok(branch)
    }
}

fn out_of_range(account: LocalAccountId) -> ShardError {
    ShardError::Database(format!("balance of account {} out of range", account))
}

/// Parks the next `XA START` until released.
///
/// `entered` fires once the start call has been reached; `release` lets it
/// continue.
#[derive(Debug)]
pub struct BranchGate {
    entered: Notify,
    release: Semaphore,
}

impl BranchGate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Wait until a branch start is parked on this gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

/// In-process shard
pub struct InMemoryShard {
    name: String,
    inner: Mutex<Inner>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_accounts(name, BTreeMap::new())
    }

    pub fn with_accounts(
        name: impl Into<String>,
        accounts: BTreeMap<LocalAccountId, Decimal>,
    ) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                balances: accounts,
                ..Default::default()
            }),
            latency: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite a committed balance
    pub fn set_balance(&self, account: LocalAccountId, balance: Decimal) {
        self.lock().balances.insert(account, balance);
    }

    /// Committed balance, `None` if the account does not exist
    pub fn balance(&self, account: LocalAccountId) -> Option<Decimal> {
        self.lock().balances.get(&account).copied()
    }

    /// Branches not yet committed or rolled back
    pub fn open_branches(&self) -> usize {
        self.lock().branches.len()
    }

    /// Number of PREPARED branches (in doubt if the coordinator is gone)
    pub fn prepared_branches(&self) -> usize {
        self.lock()
            .branches
            .values()
            .filter(|b| b.state == XaState::Prepared)
            .count()
    }

    /// Make every subsequent `op` fail with [`ShardError::Unavailable`]
    pub fn fail_on(&self, op: ShardOp) {
        self.lock().faults.insert(op);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn calls(&self, op: ShardOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Park the next branch start until [`BranchGate::release`] is called
    pub fn install_gate(&self) -> Arc<BranchGate> {
        let gate = Arc::new(BranchGate::new());
        self.lock().gate = Some(gate.clone());
        gate
    }

    /// Common entry: count, delay, inject faults
    async fn enter(&self, op: ShardOp) -> Result<(), ShardError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        debug!(shard = %self.name, op = %op, "In-memory shard call");
        if inner.faults.contains(&op) {
            return Err(ShardError::Unavailable(format!(
                "{}: injected failure on {}",
                self.name, op
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for InMemoryShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.enter(ShardOp::Start).await?;

        let gate = self.lock().gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.lock();
        if let Some(attached) = inner.attached {
            return Err(ShardError::Protocol(format!(
                "XAER_OUTSIDE: branch {} is already active on this connection",
                attached
            )));
        }
        if inner.branches.contains_key(xid) {
            return Err(ShardError::Protocol(format!("XAER_DUPID: {} already exists", xid)));
        }
        inner.branches.insert(
            *xid,
            Branch {
                state: XaState::Active,
                deltas: BTreeMap::new(),
            },
        );
        inner.attached = Some(*xid);
        Ok(())
    }

    async fn end_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.enter(ShardOp::End).await?;
        let mut inner = self.lock();
        inner.branch_in(xid, &[XaState::Active])?.state = XaState::Idle;
        inner.attached = None;
        Ok(())
    }

    async fn prepare_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.enter(ShardOp::Prepare).await?;
        let mut inner = self.lock();
        inner.branch_in(xid, &[XaState::Idle])?.state = XaState::Prepared;
        Ok(())
    }

    async fn commit_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.enter(ShardOp::Commit).await?;
        let mut inner = self.lock();
        let deltas = inner.branch_in(xid, &[XaState::Prepared])?.deltas.clone();

        // Nothing is applied unless every balance stays in range
        let mut updated = Vec::with_capacity(deltas.len());
        for (account, delta) in deltas {
            if let Some(balance) = inner.balances.get(&account) {
                let next = balance
                    .checked_add(delta)
                    .ok_or_else(|| out_of_range(account))?;
                updated.push((account, next));
            }
        }
        inner.balances.extend(updated);
        inner.branches.remove(xid);
        Ok(())
    }

    async fn rollback_branch(&self, xid: &GlobalTxnId) -> Result<(), ShardError> {
        self.enter(ShardOp::Rollback).await?;
        let mut inner = self.lock();
        inner.branch_in(xid, &[XaState::Idle, XaState::Prepared])?;
        inner.branches.remove(xid);
        Ok(())
    }

    async fn account_exists(&self, account: LocalAccountId) -> Result<bool, ShardError> {
        self.enter(ShardOp::AccountExists).await?;
        Ok(self.lock().balances.contains_key(&account))
    }

    async fn balance_exceeds(
        &self,
        account: LocalAccountId,
        amount: Decimal,
    ) -> Result<bool, ShardError> {
        self.enter(ShardOp::BalanceExceeds).await?;
        Ok(self
            .lock()
            .visible_balance(account)?
            .is_some_and(|balance| balance > amount))
    }

    async fn debit(&self, account: LocalAccountId, amount: Decimal) -> Result<(), ShardError> {
        self.enter(ShardOp::Debit).await?;
        self.lock().apply(account, -amount)
    }

    async fn credit(&self, account: LocalAccountId, amount: Decimal) -> Result<(), ShardError> {
        self.enter(ShardOp::Credit).await?;
        self.lock().apply(account, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn shard() -> InMemoryShard {
        InMemoryShard::with_accounts("test", BTreeMap::from([(1, dec!(100)), (2, dec!(10))]))
    }

    #[tokio::test]
    async fn test_commit_applies_deltas() {
        let shard = shard();
        let xid = GlobalTxnId::new();

        shard.begin_branch(&xid).await.unwrap();
        shard.debit(1, dec!(30)).await.unwrap();
        shard.credit(2, dec!(30)).await.unwrap();

        // Uncommitted writes stay invisible to the committed view
        assert_eq!(shard.balance(1), Some(dec!(100)));

        shard.end_branch(&xid).await.unwrap();
        shard.prepare_branch(&xid).await.unwrap();
        assert_eq!(shard.prepared_branches(), 1);
        shard.commit_branch(&xid).await.unwrap();

        assert_eq!(shard.balance(1), Some(dec!(70)));
        assert_eq!(shard.balance(2), Some(dec!(40)));
        assert_eq!(shard.open_branches(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_deltas() {
        let shard = shard();
        let xid = GlobalTxnId::new();

        shard.begin_branch(&xid).await.unwrap();
        shard.debit(1, dec!(30)).await.unwrap();
        shard.end_branch(&xid).await.unwrap();
        shard.rollback_branch(&xid).await.unwrap();

        assert_eq!(shard.balance(1), Some(dec!(100)));
        assert_eq!(shard.open_branches(), 0);
    }

    #[tokio::test]
    async fn test_rollback_requires_end() {
        let shard = shard();
        let xid = GlobalTxnId::new();

        shard.begin_branch(&xid).await.unwrap();
        let err = shard.rollback_branch(&xid).await.unwrap_err();
        assert!(matches!(err, ShardError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_commit_requires_prepare() {
        let shard = shard();
        let xid = GlobalTxnId::new();

        shard.begin_branch(&xid).await.unwrap();
        shard.end_branch(&xid).await.unwrap();
        assert!(shard.commit_branch(&xid).await.is_err());
    }

    #[tokio::test]
    async fn test_one_active_branch_per_connection() {
        let shard = shard();
        shard.begin_branch(&GlobalTxnId::new()).await.unwrap();
        let err = shard.begin_branch(&GlobalTxnId::new()).await.unwrap_err();
        assert!(matches!(err, ShardError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_balance_exceeds_is_strict_and_sees_own_writes() {
        let shard = shard();
        assert!(!shard.balance_exceeds(1, dec!(100)).await.unwrap());
        assert!(shard.balance_exceeds(1, dec!(99.99)).await.unwrap());
        assert!(!shard.balance_exceeds(42, dec!(0)).await.unwrap());

        let xid = GlobalTxnId::new();
        shard.begin_branch(&xid).await.unwrap();
        shard.debit(1, dec!(50)).await.unwrap();
        assert!(!shard.balance_exceeds(1, dec!(50)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fault_injection_and_counters() {
        let shard = shard();
        shard.fail_on(ShardOp::Prepare);

        let xid = GlobalTxnId::new();
        shard.begin_branch(&xid).await.unwrap();
        shard.end_branch(&xid).await.unwrap();
        let err = shard.prepare_branch(&xid).await.unwrap_err();
        assert!(matches!(err, ShardError::Unavailable(_)));

        assert_eq!(shard.calls(ShardOp::Start), 1);
        assert_eq!(shard.calls(ShardOp::Prepare), 1);
        assert_eq!(shard.total_calls(), 3);

        shard.clear_faults();
        shard.prepare_branch(&xid).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_xid() {
        let shard = shard();
        let err = shard.end_branch(&GlobalTxnId::new()).await.unwrap_err();
        assert!(matches!(err, ShardError::UnknownXid(_)));
        let err = shard.rollback_branch(&GlobalTxnId::new()).await.unwrap_err();
        assert!(matches!(err, ShardError::UnknownXid(_)));
    }

    #[tokio::test]
    async fn test_balance_overflow_is_a_database_error() {
        let shard = InMemoryShard::with_accounts("test", BTreeMap::from([(1, Decimal::MAX)]));

        // Autocommit write
        let err = shard.credit(1, dec!(1)).await.unwrap_err();
        assert!(matches!(err, ShardError::Database(_)));
        assert_eq!(shard.balance(1), Some(Decimal::MAX));

        // Inside a branch
        let xid = GlobalTxnId::new();
        shard.begin_branch(&xid).await.unwrap();
        let err = shard.credit(1, dec!(1)).await.unwrap_err();
        assert!(matches!(err, ShardError::Database(_)));
        shard.debit(1, dec!(1)).await.unwrap();
        shard.end_branch(&xid).await.unwrap();
        shard.rollback_branch(&xid).await.unwrap();
        assert_eq!(shard.balance(1), Some(Decimal::MAX));
    }

    #[tokio::test]
    async fn test_commit_overflow_keeps_branch_prepared() {
        let shard = InMemoryShard::with_accounts(
            "test",
            BTreeMap::from([(1, Decimal::MAX - dec!(1))]),
        );
        let xid = GlobalTxnId::new();
        shard.begin_branch(&xid).await.unwrap();
        shard.credit(1, dec!(1)).await.unwrap();
        shard.end_branch(&xid).await.unwrap();
        shard.prepare_branch(&xid).await.unwrap();

        shard.set_balance(1, Decimal::MAX);
        let err = shard.commit_branch(&xid).await.unwrap_err();

        assert!(matches!(err, ShardError::Database(_)));
        assert_eq!(shard.balance(1), Some(Decimal::MAX));
        assert_eq!(shard.prepared_branches(), 1);
    }

    #[tokio::test]
    async fn test_gate_parks_start() {
        let shard = Arc::new(shard());
        let gate = shard.install_gate();

        let xid = GlobalTxnId::new();
        let task = {
            let shard = shard.clone();
            tokio::spawn(async move { shard.begin_branch(&xid).await })
        };

        gate.entered().await;
        assert_eq!(shard.open_branches(), 0);
        gate.release();
        task.await.unwrap().unwrap();
        assert_eq!(shard.open_branches(), 1);
    }
}
