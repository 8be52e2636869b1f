use crate::receipts::ReceiptStatus;

/// Postgres SQLSTATE for serialization failures
const SERIALIZATION_FAILURE: &str = "40001";
/// Postgres SQLSTATE for detected deadlocks
const DEADLOCK_DETECTED: &str = "40P01";

/// Error types for storage operations
///
/// Guard failures of conditional updates surface as typed variants so that
/// services can report them without a second read.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Reward {reward_id} is out of stock")]
    OutOfStock { reward_id: i64 },

    #[error("Reward {reward_id} is inactive")]
    RewardInactive { reward_id: i64 },

    #[error("Invalid receipt status transition from {from} to {to}")]
    InvalidTransition { from: ReceiptStatus, to: ReceiptStatus },

    #[error("Agent {agent_id} already has an open shift")]
    AlreadyClockedIn { agent_id: i64 },

    #[error("Agent {agent_id} has no open shift today")]
    NoActiveShift { agent_id: i64 },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Lost a race; the whole operation can be retried from scratch
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| code.into_owned());

        match code.as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(StoreError::Conflict("serialization failure".to_string()).is_retryable());
        assert!(!StoreError::OutOfStock { reward_id: 1 }.is_retryable());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn test_non_database_errors_stay_database() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::not_found("Shopper", 42);
        assert_eq!(err.to_string(), "Shopper not found: 42");
    }
}
