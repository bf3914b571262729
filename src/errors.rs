//! Error types for the round engine and its transport boundary.

use crate::types::BetId;

/// Every way a command or a settlement step can fail.
///
/// Validation and reservation errors are returned synchronously to the
/// caller; `SettlementFailure` is per-bet and never aborts the rest of a
/// round's settlement.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("bet amount must be a positive whole number of chips")]
    InvalidAmount,

    #[error("bet side must be 'red' or 'blue'")]
    InvalidSide,

    #[error("user not found")]
    UserNotFound,

    #[error("not logged in")]
    Unauthenticated,

    #[error("no round is open for betting")]
    RoundNotOpen,

    #[error("bet references a stale or mismatched round")]
    RoundMismatch,

    #[error("insufficient chips, or chips held by another reservation")]
    InsufficientFunds,

    #[error("bet {0} was already settled")]
    AlreadySettled(BetId),

    #[error("unknown bet {0}")]
    UnknownBet(BetId),

    #[error("settlement failed for bet {bet_id}: {reason}")]
    SettlementFailure { bet_id: BetId, reason: String },

    #[error("credit declined: {0}")]
    CreditDeclined(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Short machine-readable code carried on wire-level error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidAmount => "invalid_amount",
            EngineError::InvalidSide => "invalid_side",
            EngineError::UserNotFound => "user_not_found",
            EngineError::Unauthenticated => "unauthenticated",
            EngineError::RoundNotOpen => "round_not_open",
            EngineError::RoundMismatch => "round_mismatch",
            EngineError::InsufficientFunds => "insufficient_funds",
            EngineError::AlreadySettled(_) => "already_settled",
            EngineError::UnknownBet(_) => "unknown_bet",
            EngineError::SettlementFailure { .. } => "settlement_failure",
            EngineError::CreditDeclined(_) => "credit_declined",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::Store(_) => "store_error",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(EngineError::InvalidAmount.code(), "invalid_amount");
        assert_eq!(EngineError::RoundMismatch.code(), "round_mismatch");
        assert_eq!(
            EngineError::SettlementFailure {
                bet_id: uuid::Uuid::nil(),
                reason: "x".into()
            }
            .code(),
            "settlement_failure"
        );
    }

    #[test]
    fn test_error_display() {
        let e = EngineError::InsufficientFunds;
        assert!(e.to_string().contains("insufficient"));
    }
}
