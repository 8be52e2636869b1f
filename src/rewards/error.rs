use crate::store::StoreError;

/// Error types for reward redemption
///
/// Every variant is reported without any balance or inventory change.
#[derive(Debug, thiserror::Error)]
pub enum RedemptionError {
    #[error("Reward not found: {0}")]
    RewardNotFound(i64),

    #[error("Reward {0} is not active")]
    RewardInactive(i64),

    #[error("Shopper not found: {0}")]
    ShopperNotFound(i64),

    #[error("Insufficient balance: reward costs {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Reward {0} is out of stock")]
    OutOfStock(i64),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl RedemptionError {
    /// Lost a race against a concurrent writer; nothing was committed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RedemptionError::Store(e) if e.is_retryable())
    }
}

impl From<StoreError> for RedemptionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "Reward", id } => {
                RedemptionError::RewardNotFound(id.parse().unwrap_or_default())
            }
            StoreError::NotFound { entity: "Shopper", id } => {
                RedemptionError::ShopperNotFound(id.parse().unwrap_or_default())
            }
            StoreError::RewardInactive { reward_id } => RedemptionError::RewardInactive(reward_id),
            StoreError::OutOfStock { reward_id } => RedemptionError::OutOfStock(reward_id),
            StoreError::InsufficientBalance { requested, available } => {
                RedemptionError::InsufficientBalance {
                    required: requested,
                    available,
                }
            }
            other => RedemptionError::Store(other),
        }
    }
}
