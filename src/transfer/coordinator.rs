//! Transfer Coordinator
//!
//! Owns the global transaction slot and sequences the XA protocol across the
//! participating shards. This is the central component: everything else is
//! either a shard capability or a boundary adapter.
//!
//! # Invariants
//!
//! 1. **One global transaction per coordinator**: a second transfer arriving
//!    while one is in flight is rejected, not queued, and touches no shard.
//! 2. **Validation before the slot**: malformed ids, unknown shards, bad
//!    amounts and same-account transfers never allocate a transaction.
//! 3. **All-prepared barrier**: every participant reaches PREPARED before any
//!    COMMIT is issued.
//! 4. **Slot always cleared**: the slot guard empties the slot on every exit.
//! 5. **Original error wins**: rollback failures are reported alongside the
//!    error that caused the rollback, never instead of it.
//! 6. **Caller-independent outcome**: once the slot is taken the protocol runs
//!    on its own task, which commits or rolls back whether or not anyone is
//!    still awaiting it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::branch::{BranchDriver, BranchState, invoke};
use super::error::TransferError;
use super::state::TransactionPhase;
use super::types::{GlobalTransaction, GlobalTxnId, TransferReceipt, TransferRequest};
use super::validation::BalancePolicy;
use crate::account_id::GlobalAccountId;
use crate::shard::{ResourceManager, ShardError, ShardIndex, ShardOp, ShardRegistry};

type Slot = Mutex<Option<GlobalTransaction>>;

/// Holds the slot for one transfer and clears it on drop
struct SlotGuard {
    slot: Arc<Slot>,
    xid: GlobalTxnId,
}

impl SlotGuard {
    fn acquire(slot: &Arc<Slot>, participants: Vec<ShardIndex>) -> Result<Self, TransferError> {
        let mut current = lock(slot);
        if let Some(active) = current.as_ref() {
            return Err(TransferError::ConcurrentTransaction { active: active.id });
        }
        let txn = GlobalTransaction::new(participants);
        let xid = txn.id;
        *current = Some(txn);
        Ok(Self {
            slot: slot.clone(),
            xid,
        })
    }

    fn set_phase(&self, phase: TransactionPhase) {
        if let Some(txn) = lock(&self.slot).as_mut() {
            debug!(xid = %self.xid, from = %txn.phase, to = %phase, "Phase transition");
            txn.phase = phase;
        }
    }

    fn phase(&self) -> TransactionPhase {
        lock(&self.slot)
            .as_ref()
            .map_or(TransactionPhase::Idle, |txn| txn.phase)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        *lock(&self.slot) = None;
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<GlobalTransaction>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait for every future, then report the first failure
async fn all<F>(calls: impl IntoIterator<Item = F>) -> Result<(), TransferError>
where
    F: std::future::Future<Output = Result<(), TransferError>>,
{
    join_all(calls).await.into_iter().collect()
}

/// Transfer Coordinator - one instance per process
pub struct TransferCoordinator {
    shards: Arc<ShardRegistry>,
    slot: Arc<Slot>,
    protocol: Arc<Protocol>,
}

impl TransferCoordinator {
    pub fn new(shards: Arc<ShardRegistry>) -> Self {
        Self::with_timeout(shards, None)
    }

    /// Bound every shard call by `branch_timeout`
    pub fn with_timeout(shards: Arc<ShardRegistry>, branch_timeout: Option<Duration>) -> Self {
        Self {
            shards: shards.clone(),
            slot: Arc::new(Mutex::new(None)),
            protocol: Arc::new(Protocol {
                shards,
                policy: BalancePolicy::new(branch_timeout),
                branch_timeout,
            }),
        }
    }

    pub fn shards(&self) -> &Arc<ShardRegistry> {
        &self.shards
    }

    /// Snapshot of the in-flight transaction, if any
    pub fn active_transaction(&self) -> Option<GlobalTransaction> {
        lock(&self.slot).clone()
    }

    /// Move `amount` from `origin` to `destination` (`"<shard>-<account>"`).
    ///
    /// See [`execute`](Self::execute) for what happens if the returned
    /// future is dropped.
    pub async fn transfer(
        &self,
        origin: &str,
        destination: &str,
        amount: Decimal,
    ) -> Result<TransferReceipt, TransferError> {
        let origin = GlobalAccountId::parse(origin, &self.shards)?;
        let destination = GlobalAccountId::parse(destination, &self.shards)?;
        self.execute(TransferRequest::new(origin, destination, amount))
            .await
    }

    /// Run a transfer whose ids are already parsed.
    ///
    /// Validation and slot acquisition happen on the caller's task. The XA
    /// protocol then runs on a spawned Tokio task that owns the slot, so
    /// dropping the returned future stops waiting for the outcome but never
    /// abandons open branches: the transaction still commits or rolls back
    /// and the slot is released when it does. Must be called from within a
    /// Tokio runtime.
    pub async fn execute(&self, req: TransferRequest) -> Result<TransferReceipt, TransferError> {
        self.validate(&req)?;

        let slot = match SlotGuard::acquire(&self.slot, req.participants()) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(
                    origin = %req.origin,
                    destination = %req.destination,
                    error = %e,
                    "Transfer rejected"
                );
                return Err(e);
            }
        };
        let xid = slot.xid;

        info!(
            xid = %xid,
            origin = %req.origin,
            destination = %req.destination,
            amount = %req.amount,
            "Global transaction started"
        );

        let protocol = self.protocol.clone();
        let task = tokio::spawn(async move { protocol.execute(slot, req).await });

        match task.await {
            Ok(result) => result,
            Err(e) => match e.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(e) => {
                    error!(xid = %xid, error = %e, "Transaction task cancelled");
                    Err(TransferError::Aborted { xid })
                }
            },
        }
    }

    /// Checks that never need a shard
    fn validate(&self, req: &TransferRequest) -> Result<(), TransferError> {
        for account in [&req.origin, &req.destination] {
            if !self.shards.contains(account.shard()) {
                return Err(TransferError::UnknownShard(account.shard().to_string()));
            }
        }
        if req.amount < Decimal::ZERO {
            return Err(TransferError::InvalidAmount(req.amount.to_string()));
        }
        if req.origin == req.destination {
            return Err(TransferError::SameAccount(req.origin));
        }
        Ok(())
    }

}

/// XA sequencing shared with the task that drives each transaction
struct Protocol {
    shards: Arc<ShardRegistry>,
    policy: BalancePolicy,
    branch_timeout: Option<Duration>,
}

impl Protocol {
    async fn execute(
        &self,
        slot: SlotGuard,
        req: TransferRequest,
    ) -> Result<TransferReceipt, TransferError> {
        let xid = slot.xid;
        let mut branches = self.branches(xid, &req)?;

        match self.run(&slot, &req, &mut branches).await {
            Ok(()) => {
                info!(
                    xid = %xid,
                    participants = branches.len(),
                    "🔒 Global transaction committed"
                );
                Ok(TransferReceipt::committed(xid, &req))
            }
            Err(err @ TransferError::PartialCommit { .. }) => {
                error!(xid = %xid, error = %err, "Global transaction left in doubt");
                Err(err)
            }
            Err(err) => {
                let failed_in = slot.phase();
                if failed_in.rolls_back_on_failure() {
                    slot.set_phase(TransactionPhase::RollingBack);
                }
                warn!(
                    xid = %xid,
                    phase = %failed_in,
                    error = %err,
                    "Rolling back global transaction"
                );
                Err(self.roll_back(xid, &mut branches, err).await)
            }
        }
    }

    fn shard(
        &self,
        account: &GlobalAccountId,
    ) -> Result<&Arc<dyn ResourceManager>, TransferError> {
        self.shards
            .get(account.shard())
            .ok_or_else(|| TransferError::UnknownShard(account.shard().to_string()))
    }

    fn branches(
        &self,
        xid: GlobalTxnId,
        req: &TransferRequest,
    ) -> Result<Vec<BranchDriver>, TransferError> {
        req.participants()
            .into_iter()
            .map(|shard| {
                let rm = self
                    .shards
                    .get(shard)
                    .ok_or_else(|| TransferError::UnknownShard(shard.to_string()))?;
                Ok(BranchDriver::new(shard, rm.clone(), xid, self.branch_timeout))
            })
            .collect()
    }

    /// STARTING through COMMITTING
    async fn run(
        &self,
        slot: &SlotGuard,
        req: &TransferRequest,
        branches: &mut [BranchDriver],
    ) -> Result<(), TransferError> {
        // === STARTING ===
        all(branches.iter_mut().map(|b| b.start())).await?;

        let origin = self.shard(&req.origin)?.as_ref();
        let destination = self.shard(&req.destination)?.as_ref();

        // === VALIDATING ===
        slot.set_phase(TransactionPhase::Validating);
        self.policy.check_exists(origin, &req.origin).await?;
        self.policy.check_exists(destination, &req.destination).await?;
        self.policy
            .check_sufficient(origin, &req.origin, req.amount)
            .await?;

        // === MUTATING ===
        slot.set_phase(TransactionPhase::Mutating);
        invoke(
            req.origin.shard(),
            ShardOp::Debit,
            self.branch_timeout,
            origin.debit(req.origin.account(), req.amount),
        )
        .await?;
        invoke(
            req.destination.shard(),
            ShardOp::Credit,
            self.branch_timeout,
            destination.credit(req.destination.account(), req.amount),
        )
        .await?;

        // === ENDING ===
        slot.set_phase(TransactionPhase::Ending);
        all(branches.iter_mut().map(|b| b.end())).await?;

        // === PREPARING === (barrier: every vote in before any commit)
        slot.set_phase(TransactionPhase::Preparing);
        all(branches.iter_mut().map(|b| b.prepare())).await?;

        // === COMMITTING ===
        slot.set_phase(TransactionPhase::Committing);
        self.commit_all(slot.xid, branches).await
    }

    /// Commit prepared branches one by one.
    ///
    /// A definite failure on the first commit still allows a clean abort.
    /// Once any branch has committed, or a commit timed out and may have
    /// applied, the decision is commit: the remaining branches are still
    /// committed, failed ones stay PREPARED (or in doubt) and the result is
    /// [`TransferError::PartialCommit`].
    async fn commit_all(
        &self,
        xid: GlobalTxnId,
        branches: &mut [BranchDriver],
    ) -> Result<(), TransferError> {
        let mut committed = Vec::with_capacity(branches.len());
        let mut failed: Option<(ShardIndex, ShardError)> = None;

        for branch in branches.iter_mut() {
            let Err(e) = branch.commit().await else {
                committed.push(branch.shard());
                continue;
            };

            let in_doubt = branch.state() == BranchState::InDoubt;
            if committed.is_empty() && failed.is_none() && !in_doubt {
                return Err(e);
            }

            warn!(
                xid = %xid,
                shard = branch.shard(),
                in_doubt,
                error = %e,
                "Commit failed after the commit decision"
            );
            let source = match e {
                TransferError::ResourceManager { source, .. } => source,
                other => ShardError::Protocol(other.to_string()),
            };
            failed.get_or_insert((branch.shard(), source));
        }

        match failed {
            None => Ok(()),
            Some((shard, source)) => Err(TransferError::PartialCommit {
                xid,
                committed,
                shard,
                source,
            }),
        }
    }

    /// Undo every opened branch and build the error for the caller
    async fn roll_back(
        &self,
        xid: GlobalTxnId,
        branches: &mut [BranchDriver],
        cause: TransferError,
    ) -> TransferError {
        let results = join_all(
            branches
                .iter_mut()
                .filter(|b| b.is_open())
                .map(|b| b.rollback()),
        )
        .await;

        let failures: Vec<TransferError> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            let states: Vec<BranchState> = branches.iter().map(|b| b.state()).collect();
            info!(xid = %xid, branches = ?states, "Global transaction rolled back");
            return cause;
        }

        for failure in &failures {
            error!(xid = %xid, error = %failure, "Branch rollback failed");
        }
        TransferError::RollbackFailure {
            cause: Box::new(cause),
            failures,
        }
    }
}
