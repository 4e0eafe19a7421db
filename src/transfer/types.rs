//! Transfer Core Types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::state::TransactionPhase;
use crate::account_id::GlobalAccountId;
use crate::shard::ShardIndex;

/// Global transaction id - ULID based, also used as the XA `gtrid`
///
/// 48-bit millisecond timestamp plus 80 random bits, so ids stay unique under
/// rapid repeated calls within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalTxnId(ulid::Ulid);

impl GlobalTxnId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for GlobalTxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GlobalTxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GlobalTxnId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for GlobalTxnId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A validated transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub origin: GlobalAccountId,
    pub destination: GlobalAccountId,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(origin: GlobalAccountId, destination: GlobalAccountId, amount: Decimal) -> Self {
        Self {
            origin,
            destination,
            amount,
        }
    }

    /// Shards that get a branch: one if both accounts co-locate, else two
    pub fn participants(&self) -> Vec<ShardIndex> {
        if self.origin.shard() == self.destination.shard() {
            vec![self.origin.shard()]
        } else {
            vec![self.origin.shard(), self.destination.shard()]
        }
    }
}

/// The single in-flight unit of work
#[derive(Debug, Clone, Serialize)]
pub struct GlobalTransaction {
    pub id: GlobalTxnId,
    pub participants: Vec<ShardIndex>,
    pub phase: TransactionPhase,
    pub started_at: DateTime<Utc>,
}

impl GlobalTransaction {
    pub fn new(participants: Vec<ShardIndex>) -> Self {
        Self {
            id: GlobalTxnId::new(),
            participants,
            phase: TransactionPhase::Starting,
            started_at: Utc::now(),
        }
    }
}

/// Result of a committed transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub success: bool,
    pub xid: GlobalTxnId,
    pub origin: GlobalAccountId,
    pub destination: GlobalAccountId,
    pub amount: Decimal,
    /// Always `-amount`
    pub origin_delta: Decimal,
    /// Always `+amount`
    pub destination_delta: Decimal,
    pub participants: Vec<ShardIndex>,
    pub committed_at: DateTime<Utc>,
}

impl TransferReceipt {
    pub fn committed(xid: GlobalTxnId, req: &TransferRequest) -> Self {
        Self {
            success: true,
            xid,
            origin: req.origin,
            destination: req.destination,
            amount: req.amount,
            origin_delta: -req.amount,
            destination_delta: req.amount,
            participants: req.participants(),
            committed_at: Utc::now(),
        }
    }
}
