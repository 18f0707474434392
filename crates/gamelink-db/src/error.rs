//! Database error types

use thiserror::Error;

use gamelink_types::CommissionError;

/// Unique constraint on `commission_records.order_id`
pub const RECORD_ORDER_UNIQUE: &str = "commission_records_order_id_key";

/// Unique constraint on `monthly_settlements (player_id, settlement_month)`
pub const SETTLEMENT_PLAYER_MONTH_UNIQUE: &str = "monthly_settlements_player_month_key";

/// Partial unique index allowing one active unscoped default rule
pub const SINGLE_DEFAULT_RULE_UNIQUE: &str = "commission_rules_single_active_default";

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation, carrying the constraint name
    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored rows disagree with what a write expected
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Classify a sqlx error, turning unique violations into `Duplicate`
    pub fn from_query(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return DbError::Duplicate(db_err.constraint().unwrap_or("unknown").to_string());
            }
        }
        DbError::Query(e)
    }
}

impl From<deadpool_redis::PoolError> for DbError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        DbError::Redis(e.to_string())
    }
}

impl From<redis::RedisError> for DbError {
    fn from(e: redis::RedisError) -> Self {
        DbError::Redis(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<DbError> for CommissionError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => CommissionError::NotFound {
                entity: "row",
                id: what,
            },
            DbError::InvalidInput(msg) => CommissionError::Validation(msg),
            DbError::Duplicate(constraint) if constraint == SINGLE_DEFAULT_RULE_UNIQUE => {
                CommissionError::validation("an active default rule already exists")
            }
            other => CommissionError::Storage(other.to_string()),
        }
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_into_commission_errors() {
        let err: CommissionError = DbError::InvalidInput("bad month".to_string()).into();
        assert!(matches!(err, CommissionError::Validation(_)));

        let err: CommissionError = DbError::Duplicate(SINGLE_DEFAULT_RULE_UNIQUE.to_string()).into();
        assert!(matches!(err, CommissionError::Validation(_)));

        let err: CommissionError = DbError::Redis("timeout".to_string()).into();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }
}
