//! Global Account Identifier
//!
//! A global account reference is `"<shard>-<account>"`, e.g. `"0-17"` is
//! account 17 in shard 0. Parsing is split in two steps:
//! - [`FromStr`]: syntax only (`^\d+-\d+$`) → [`TransferError::InvalidIdentifier`];
//!   a shard index too large to ever be registered → [`TransferError::UnknownShard`]
//! - [`GlobalAccountId::parse`]: syntax + registered shard → [`TransferError::UnknownShard`]

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::shard::{LocalAccountId, ShardIndex, ShardRegistry};
use crate::transfer::error::TransferError;

/// Account address across shards. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalAccountId {
    shard: ShardIndex,
    account: LocalAccountId,
}

impl GlobalAccountId {
    /// Parse and check that the shard is registered
    pub fn parse(text: &str, shards: &ShardRegistry) -> Result<Self, TransferError> {
        let id: GlobalAccountId = text.parse()?;
        if !shards.contains(id.shard) {
            return Err(TransferError::UnknownShard(id.shard.to_string()));
        }
        Ok(id)
    }

    pub fn shard(&self) -> ShardIndex {
        self.shard
    }

    pub fn account(&self) -> LocalAccountId {
        self.account
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for GlobalAccountId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransferError::InvalidIdentifier(s.to_string());

        let (shard, account) = s.split_once('-').ok_or_else(invalid)?;
        if !is_digits(shard) || !is_digits(account) {
            return Err(invalid());
        }

        // Digits only, so the only possible failure is overflow. No shard
        // index past ShardIndex::MAX can be registered.
        let shard = shard.parse().map_err(|_| {
            let digits = shard.trim_start_matches('0');
            TransferError::UnknownShard(digits.to_string())
        })?;
        // Local ids are BIGINT UNSIGNED on every shard; anything wider cannot
        // address a row.
        let account = account.parse().map_err(|_| invalid())?;
        Ok(Self { shard, account })
    }
}

impl fmt::Display for GlobalAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.shard, self.account)
    }
}

impl Serialize for GlobalAccountId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
