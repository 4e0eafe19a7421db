//! Transfer API Layer
//!
//! The single operation exposed to the request layer, plus the boundary
//! validation of raw input and the mapping of errors to response bodies.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;

use super::coordinator::TransferCoordinator;
use super::error::TransferError;
use super::types::{TransferReceipt, TransferRequest};
use crate::account_id::GlobalAccountId;

/// Message returned with every successful transfer
pub const SUCCESS_MSG: &str = "Sucesso.";

// ============================================================================
// API Response Types
// ============================================================================

/// Successful transfer response
#[derive(Debug, Serialize)]
pub struct TransferApiResponse {
    #[serde(flatten)]
    pub receipt: TransferReceipt,
    pub msg: String,
}

/// Failure response: error kind, code and message
///
/// A rollback failure nests the error that triggered the rollback under
/// `cause`, so both reach the client.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TransferErrorBody {
    pub success: bool,
    pub name: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<TransferErrorBody>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollback_failures: Vec<String>,
}

impl From<&TransferError> for TransferErrorBody {
    fn from(e: &TransferError) -> Self {
        let (cause, rollback_failures) = match e {
            TransferError::RollbackFailure { cause, failures } => (
                Some(Box::new(TransferErrorBody::from(cause.as_ref()))),
                failures.iter().map(|f| f.to_string()).collect(),
            ),
            _ => (None, Vec::new()),
        };

        Self {
            success: false,
            name: e.kind().to_string(),
            code: e.code().to_string(),
            message: e.to_string(),
            cause,
            rollback_failures,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a non-negative decimal amount
pub fn parse_amount(s: &str) -> Result<Decimal, TransferError> {
    let trimmed = s.trim();
    let invalid = || TransferError::InvalidAmount(s.to_string());

    // Decimal::from_str also accepts "1e3" style; plain digits and one dot only
    if trimmed.is_empty()
        || !trimmed.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        || trimmed.starts_with('.')
        || trimmed.ends_with('.')
    {
        return Err(invalid());
    }

    Decimal::from_str(trimmed).map_err(|_| invalid())
}

// ============================================================================
// Operation
// ============================================================================

/// Validate raw request input and run the transfer.
///
/// Input is checked in request order: origin, destination, then amount.
pub async fn transfer(
    coordinator: &TransferCoordinator,
    origin: &str,
    destination: &str,
    amount: &str,
) -> Result<TransferApiResponse, TransferError> {
    let origin = GlobalAccountId::parse(origin, coordinator.shards())?;
    let destination = GlobalAccountId::parse(destination, coordinator.shards())?;
    let amount = parse_amount(amount)?;
    let receipt = coordinator
        .execute(TransferRequest::new(origin, destination, amount))
        .await?;
    Ok(TransferApiResponse {
        receipt,
        msg: SUCCESS_MSG.to_string(),
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{ShardError, ShardOp};
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("50").unwrap(), dec!(50));
        assert_eq!(parse_amount("0.5").unwrap(), dec!(0.5));
        assert_eq!(parse_amount("1000000").unwrap(), dec!(1000000));
        assert_eq!(parse_amount(" 12.25 ").unwrap(), dec!(12.25));
        assert_eq!(parse_amount("0").unwrap(), dec!(0));

        assert!(parse_amount("").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("1.2.3").is_err());
        assert!(parse_amount(".5").is_err());
        assert!(parse_amount("5.").is_err());
        assert!(parse_amount("1e3").is_err());
    }

    #[tokio::test]
    async fn test_identifiers_checked_before_amount() {
        use crate::shard::{InMemoryShard, ShardRegistry};
        use std::sync::Arc;

        let shards = ShardRegistry::new(vec![Arc::new(InMemoryShard::new("s0"))]);
        let coordinator = TransferCoordinator::new(Arc::new(shards));

        let err = transfer(&coordinator, "9-1", "0-1", "abc").await.unwrap_err();
        assert!(matches!(err, TransferError::UnknownShard(ref s) if s == "9"));

        let err = transfer(&coordinator, "0-1", "x", "abc").await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidIdentifier(_)));

        let err = transfer(&coordinator, "0-1", "0-2", "abc").await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount(_)));
    }

    #[test]
    fn test_error_body() {
        let err = TransferError::UnknownShard("9".into());
        let body = TransferErrorBody::from(&err);
        assert!(!body.success);
        assert_eq!(body.name, "UnknownShard");
        assert_eq!(body.code, "UNKNOWN_SHARD");
        assert_eq!(body.message, "Unknown shard: 9");
        assert!(body.cause.is_none());

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("cause").is_none());
        assert!(json.get("rollback_failures").is_none());
    }

    #[test]
    fn test_rollback_failure_body_surfaces_both() {
        let err = TransferError::RollbackFailure {
            cause: Box::new(TransferError::InsufficientFunds {
                account: "0-1".parse().unwrap(),
                amount: dec!(10),
            }),
            failures: vec![TransferError::resource_manager(
                1,
                ShardOp::Rollback,
                ShardError::Unavailable("gone".into()),
            )],
        };
        let body = TransferErrorBody::from(&err);
        assert_eq!(body.name, "RollbackFailure");
        assert_eq!(body.cause.as_ref().unwrap().name, "InsufficientFunds");
        assert_eq!(body.rollback_failures.len(), 1);
        assert!(body.rollback_failures[0].contains("XA ROLLBACK"));
    }
}
