//! Branch Protocol Driver
//!
//! Drives one shard's XA branch through START → END → PREPARE → COMMIT and
//! knows how to undo it from whatever state it reached. No retries: the first
//! failure is terminal for the branch and goes back to the coordinator.
//!
//! A timeout says nothing about whether the shard executed the statement. A
//! timed-out START leaves the branch [`BranchState::MaybeActive`] and it is
//! still rolled back; a timed-out COMMIT leaves it [`BranchState::InDoubt`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::TransferError;
use super::types::GlobalTxnId;
use crate::shard::{ResourceManager, ShardError, ShardIndex, ShardOp};

/// Run one shard call, bounded by `timeout` when set.
pub(crate) async fn invoke<T, F>(
    shard: ShardIndex,
    op: ShardOp,
    timeout: Option<Duration>,
    call: F,
) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, ShardError>>,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ShardError::Timeout(limit)),
        },
        None => call.await,
    };
    result.map_err(|e| TransferError::resource_manager(shard, op, e))
}

/// Where a branch stands, as far as the coordinator knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    NotStarted,
    /// START timed out; the shard may hold an ACTIVE branch
    MaybeActive,
    Active,
    Ended,
    Prepared,
    /// COMMIT timed out; the shard may or may not have applied it
    InDoubt,
    Committed,
    RolledBack,
}

fn timed_out(result: &Result<(), TransferError>) -> bool {
    matches!(
        result,
        Err(TransferError::ResourceManager {
            source: ShardError::Timeout(_),
            ..
        })
    )
}

fn unknown_xid(e: &TransferError) -> bool {
    matches!(
        e,
        TransferError::ResourceManager {
            source: ShardError::UnknownXid(_),
            ..
        }
    )
}

/// One participant's branch of a global transaction
pub struct BranchDriver {
    shard: ShardIndex,
    rm: Arc<dyn ResourceManager>,
    xid: GlobalTxnId,
    timeout: Option<Duration>,
    state: BranchState,
}

impl BranchDriver {
    pub fn new(
        shard: ShardIndex,
        rm: Arc<dyn ResourceManager>,
        xid: GlobalTxnId,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            shard,
            rm,
            xid,
            timeout,
            state: BranchState::NotStarted,
        }
    }

    pub fn shard(&self) -> ShardIndex {
        self.shard
    }

    pub fn state(&self) -> BranchState {
        self.state
    }

    /// Branch may exist on the shard and has not been resolved
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            BranchState::MaybeActive
                | BranchState::Active
                | BranchState::Ended
                | BranchState::Prepared
        )
    }

    async fn command(&self, op: ShardOp) -> Result<(), TransferError> {
        debug!(xid = %self.xid, shard = self.shard, op = %op, "Branch command");
        let xid = &self.xid;
        let rm = self.rm.as_ref();
        invoke(self.shard, op, self.timeout, async {
            match op {
                ShardOp::Start => rm.begin_branch(xid).await,
                ShardOp::End => rm.end_branch(xid).await,
                ShardOp::Prepare => rm.prepare_branch(xid).await,
                ShardOp::Commit => rm.commit_branch(xid).await,
                ShardOp::Rollback => rm.rollback_branch(xid).await,
                other => Err(ShardError::Protocol(format!(
                    "{} is not a branch command",
                    other
                ))),
            }
        })
        .await
    }

    async fn transition(
        &mut self,
        op: ShardOp,
        from: BranchState,
        to: BranchState,
    ) -> Result<(), TransferError> {
        if self.state != from {
            return Err(TransferError::resource_manager(
                self.shard,
                op,
                ShardError::Protocol(format!("branch is {:?}, expected {:?}", self.state, from)),
            ));
        }
        self.command(op).await?;
        self.state = to;
        Ok(())
    }

    pub async fn start(&mut self) -> Result<(), TransferError> {
        let result = self
            .transition(ShardOp::Start, BranchState::NotStarted, BranchState::Active)
            .await;
        if timed_out(&result) {
            self.state = BranchState::MaybeActive;
        }
        result
    }

    pub async fn end(&mut self) -> Result<(), TransferError> {
        self.transition(ShardOp::End, BranchState::Active, BranchState::Ended)
            .await
    }

    pub async fn prepare(&mut self) -> Result<(), TransferError> {
        self.transition(ShardOp::Prepare, BranchState::Ended, BranchState::Prepared)
            .await
    }

    pub async fn commit(&mut self) -> Result<(), TransferError> {
        let result = self
            .transition(ShardOp::Commit, BranchState::Prepared, BranchState::Committed)
            .await;
        if timed_out(&result) {
            self.state = BranchState::InDoubt;
        }
        result
    }

    /// Undo the branch from any open state: END first if (maybe) active.
    ///
    /// A branch that was never opened, or is already resolved, is left alone.
    /// An unknown-XID reply counts as rolled back: there is nothing to undo.
    pub async fn rollback(&mut self) -> Result<(), TransferError> {
        if !self.is_open() {
            return Ok(());
        }

        if matches!(self.state, BranchState::Active | BranchState::MaybeActive) {
            match self.command(ShardOp::End).await {
                Ok(()) => self.state = BranchState::Ended,
                Err(e) if unknown_xid(&e) => {
                    debug!(xid = %self.xid, shard = self.shard, "XA END found no branch")
                }
                // Still try the rollback; the shard may have detached the branch itself
                Err(e) => warn!(
                    xid = %self.xid,
                    shard = self.shard,
                    error = %e,
                    "XA END before rollback failed"
                ),
            }
        }

        match self.command(ShardOp::Rollback).await {
            Ok(()) => {}
            Err(e) if unknown_xid(&e) => {
                debug!(xid = %self.xid, shard = self.shard, "XA ROLLBACK found no branch")
            }
            Err(e) => return Err(e),
        }
        self.state = BranchState::RolledBack;
        Ok(())
    }
}
