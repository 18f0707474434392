//! Error types for the commission engine
//!
//! Every failure path returns one of these variants; nothing is swallowed.
//! `AlreadyRecorded` and `AlreadySettled` are expected idempotency outcomes
//! and callers should treat them as no-ops rather than retry.

use thiserror::Error;

use crate::{OrderId, PlayerId, SettlementMonth};

/// Result type for commission operations
pub type Result<T> = std::result::Result<T, CommissionError>;

/// Commission engine error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    // ========================================================================
    // Lookup Errors
    // ========================================================================

    /// Referenced order, rule, record or settlement is absent
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    // ========================================================================
    // Input Errors
    // ========================================================================

    /// Rate out of range, missing worker, malformed tiers, ...
    #[error("validation failed: {0}")]
    Validation(String),

    // ========================================================================
    // Idempotency Outcomes
    // ========================================================================

    /// A record already exists for this order
    #[error("commission already recorded for order {order_id}")]
    AlreadyRecorded { order_id: OrderId },

    /// Settlements already exist for this month (or worker/month)
    #[error("month {month} already settled")]
    AlreadySettled { month: SettlementMonth },

    // ========================================================================
    // Settlement Errors
    // ========================================================================

    /// No pending records in the month
    #[error("no records to settle for month {month}")]
    NoRecordsToSettle { month: SettlementMonth },

    /// Another run holds the month lock
    #[error("settlement for month {month} is already in progress")]
    SettlementInProgress { month: SettlementMonth },

    /// A run stopped part-way; workers committed before it stay settled
    #[error(
        "settlement for month {month} aborted at player {player_id} ({pending_records} records left pending) after {settled_workers} workers settled: {reason}"
    )]
    SettlementAborted {
        month: SettlementMonth,
        player_id: PlayerId,
        pending_records: usize,
        settled_workers: usize,
        reason: String,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================

    /// Opaque persistence failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl CommissionError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Expected outcome of an idempotency guard; safe to treat as success
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(self, Self::AlreadyRecorded { .. } | Self::AlreadySettled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Get an error code for operator dashboards
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION",
            Self::AlreadyRecorded { .. } => "ALREADY_RECORDED",
            Self::AlreadySettled { .. } => "ALREADY_SETTLED",
            Self::NoRecordsToSettle { .. } => "NO_RECORDS_TO_SETTLE",
            Self::SettlementInProgress { .. } => "SETTLEMENT_IN_PROGRESS",
            Self::SettlementAborted { .. } => "SETTLEMENT_ABORTED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CommissionError::not_found("order", OrderId(9));
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "order 9 not found");
    }

    #[test]
    fn test_idempotent_noops() {
        let month: SettlementMonth = "2024-11".parse().unwrap();
        assert!(CommissionError::AlreadyRecorded { order_id: OrderId(1) }.is_idempotent_noop());
        assert!(CommissionError::AlreadySettled { month }.is_idempotent_noop());
        assert!(!CommissionError::NoRecordsToSettle { month }.is_idempotent_noop());
        assert!(!CommissionError::storage("boom").is_idempotent_noop());
    }

    #[test]
    fn test_aborted_message_names_worker() {
        let err = CommissionError::SettlementAborted {
            month: "2024-11".parse().unwrap(),
            player_id: PlayerId(6),
            pending_records: 1,
            settled_workers: 1,
            reason: "connection reset".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("player 6"));
        assert!(msg.contains("1 records left pending"));
        assert!(msg.contains("after 1 workers"));
    }
}
