use crate::store::StoreError;

/// Error types for direct ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Shopper not found: {0}")]
    ShopperNotFound(i64),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_retryable())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "Shopper", id } => {
                LedgerError::ShopperNotFound(id.parse().unwrap_or_default())
            }
            StoreError::InsufficientBalance { requested, available } => {
                LedgerError::InsufficientBalance { requested, available }
            }
            other => LedgerError::Store(other),
        }
    }
}
