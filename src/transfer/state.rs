//! Global Transaction Phases
//!
//! ```text
//! IDLE → STARTING → VALIDATING → MUTATING → ENDING → PREPARING → COMMITTING → IDLE
//!                 ↘           ↘          ↘        ↘           ↘
//!                                ROLLING_BACK → IDLE
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPhase {
    /// No global transaction
    Idle,

    /// Opening a branch on every participant
    Starting,

    /// Existence and sufficiency checks
    Validating,

    /// Debit origin, credit destination
    Mutating,

    /// `XA END` on every participant
    Ending,

    /// `XA PREPARE` on every participant; all must vote before any commit
    Preparing,

    /// `XA COMMIT`, one participant at a time
    Committing,

    /// Undoing every opened branch
    RollingBack,
}

impl TransactionPhase {
    /// Whether a failure in this phase goes through the rollback path
    #[inline]
    pub fn rolls_back_on_failure(&self) -> bool {
        !matches!(
            self,
            TransactionPhase::Idle | TransactionPhase::RollingBack
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPhase::Idle => "IDLE",
            TransactionPhase::Starting => "STARTING",
            TransactionPhase::Validating => "VALIDATING",
            TransactionPhase::Mutating => "MUTATING",
            TransactionPhase::Ending => "ENDING",
            TransactionPhase::Preparing => "PREPARING",
            TransactionPhase::Committing => "COMMITTING",
            TransactionPhase::RollingBack => "ROLLING_BACK",
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_reachability() {
        for phase in [
            TransactionPhase::Starting,
            TransactionPhase::Validating,
            TransactionPhase::Mutating,
            TransactionPhase::Ending,
            TransactionPhase::Preparing,
            TransactionPhase::Committing,
        ] {
            assert!(phase.rolls_back_on_failure(), "{}", phase);
        }
        assert!(!TransactionPhase::Idle.rolls_back_on_failure());
        assert!(!TransactionPhase::RollingBack.rolls_back_on_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransactionPhase::Idle.to_string(), "IDLE");
        assert_eq!(TransactionPhase::RollingBack.to_string(), "ROLLING_BACK");
        assert_eq!(
            serde_json::to_string(&TransactionPhase::Preparing).unwrap(),
            "\"PREPARING\""
        );
    }
}
