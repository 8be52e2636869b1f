use uuid::Uuid;

use crate::receipts::{ReceiptStateMachine, ReceiptStatus};
use crate::rules::CalculationError;
use crate::store::StoreError;

/// Error types for receipt submission and settlement
///
/// Duplicate and low-quality receipts are not errors; they settle into
/// `rejected` and `flagged` and come back as outcomes.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Receipt not found: {0}")]
    ReceiptNotFound(Uuid),

    #[error("Shopper not found: {0}")]
    ShopperNotFound(i64),

    #[error("Receipt {receipt_id} is already {status}")]
    AlreadySettled { receipt_id: Uuid, status: ReceiptStatus },

    #[error("Receipt {0} is flagged and awaits a reviewer decision")]
    AwaitingReview(Uuid),

    #[error("Invalid receipt status transition from {from} to {to}")]
    InvalidTransition { from: ReceiptStatus, to: ReceiptStatus },

    #[error("Pricing error: {0}")]
    Calculation(#[from] CalculationError),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl SettlementError {
    /// Lost a race against a concurrent writer; nothing was committed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Store(e) if e.is_retryable())
    }

    /// Map a store error raised while acting on `receipt_id`
    pub(crate) fn from_store(receipt_id: Uuid, err: StoreError) -> Self {
        match err {
            StoreError::InvalidTransition { from, .. } if ReceiptStateMachine::is_terminal(from) => {
                SettlementError::AlreadySettled {
                    receipt_id,
                    status: from,
                }
            }
            other => other.into(),
        }
    }
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "Shopper", id } => {
                SettlementError::ShopperNotFound(id.parse().unwrap_or_default())
            }
            StoreError::NotFound { entity: "Receipt", id } => {
                SettlementError::ReceiptNotFound(id.parse().unwrap_or_default())
            }
            StoreError::InvalidTransition { from, to } => SettlementError::InvalidTransition { from, to },
            other => SettlementError::Store(other),
        }
    }
}

impl From<validator::ValidationErrors> for SettlementError {
    fn from(err: validator::ValidationErrors) -> Self {
        SettlementError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_transition_maps_to_already_settled() {
        let id = Uuid::new_v4();
        let err = SettlementError::from_store(
            id,
            StoreError::InvalidTransition {
                from: ReceiptStatus::Approved,
                to: ReceiptStatus::Approved,
            },
        );
        assert!(matches!(
            err,
            SettlementError::AlreadySettled { status: ReceiptStatus::Approved, .. }
        ));
    }

    #[test]
    fn test_non_terminal_transition_stays_invalid() {
        let err = SettlementError::from_store(
            Uuid::new_v4(),
            StoreError::InvalidTransition {
                from: ReceiptStatus::Flagged,
                to: ReceiptStatus::Flagged,
            },
        );
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
    }

    #[test]
    fn test_not_found_mapping() {
        let err: SettlementError = StoreError::not_found("Shopper", 12).into();
        assert!(matches!(err, SettlementError::ShopperNotFound(12)));

        let id = Uuid::new_v4();
        let err: SettlementError = StoreError::not_found("Receipt", id).into();
        assert!(matches!(err, SettlementError::ReceiptNotFound(found) if found == id));
    }

    #[test]
    fn test_retryable_only_for_conflicts() {
        assert!(SettlementError::Store(StoreError::Conflict("40001".to_string())).is_retryable());
        assert!(!SettlementError::Validation("bad".to_string()).is_retryable());
    }
}
