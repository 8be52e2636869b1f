use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::metrics::{EngineMetrics, Operation};
use crate::rewards::{InventoryStatus, Redemption, RedemptionCommit, RedemptionError, Reward, RewardFilter};
use crate::store::{LedgerStore, RewardStore};

/// Prefix of every fulfillment code
pub const CODE_PREFIX: &str = "RDM-";

/// Random characters after the prefix
pub const CODE_LENGTH: usize = 12;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Fresh opaque fulfillment code, e.g. `RDM-7K2Q9XW4MZ1B`
pub fn generate_redemption_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", CODE_PREFIX, suffix)
}

/// Service for spending points on catalog rewards
#[derive(Clone)]
pub struct RedemptionService {
    rewards: Arc<dyn RewardStore>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
}

impl RedemptionService {
    pub fn new(
        rewards: Arc<dyn RewardStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            rewards,
            ledger,
            clock,
            metrics,
        }
    }

    /// Redeem one unit of a reward for a shopper
    ///
    /// # Validation
    /// - Reward must exist and be active
    /// - Shopper balance must cover the reward cost
    /// - At least one unit must be in stock
    ///
    /// The checks are repeated as guarded updates inside the commit, so a
    /// concurrent redemption that wins the last unit or the last points makes
    /// this one fail without any partial effect.
    pub async fn redeem(&self, shopper_id: i64, reward_id: i64) -> Result<Redemption, RedemptionError> {
        let _timer = self.metrics.start(Operation::Redemption);

        let result = self.try_redeem(shopper_id, reward_id).await;
        match &result {
            Ok(redemption) => tracing::info!(
                shopper_id,
                reward_id,
                redemption_id = %redemption.id,
                points = redemption.points_used,
                "Reward redeemed"
            ),
            Err(RedemptionError::Store(e)) => {
                self.metrics.record_redemption_failed();
                tracing::error!(shopper_id, reward_id, "Redemption failed: {}", e);
            }
            Err(e) => {
                self.metrics.record_redemption_failed();
                tracing::warn!(shopper_id, reward_id, "Redemption refused: {}", e);
            }
        }
        result
    }

    async fn try_redeem(&self, shopper_id: i64, reward_id: i64) -> Result<Redemption, RedemptionError> {
        let reward = self
            .rewards
            .find_reward(reward_id)
            .await?
            .ok_or(RedemptionError::RewardNotFound(reward_id))?;
        if !reward.is_active {
            return Err(RedemptionError::RewardInactive(reward_id));
        }

        let shopper = self
            .ledger
            .find_shopper(shopper_id)
            .await?
            .ok_or(RedemptionError::ShopperNotFound(shopper_id))?;
        if shopper.points_balance < reward.points_cost {
            return Err(RedemptionError::InsufficientBalance {
                required: reward.points_cost,
                available: shopper.points_balance,
            });
        }
        if reward.inventory_count < 1 {
            return Err(RedemptionError::OutOfStock(reward_id));
        }

        let redemption = self
            .rewards
            .commit_redemption(&RedemptionCommit {
                id: Uuid::new_v4(),
                shopper_id,
                reward_id,
                code: generate_redemption_code(),
                redeemed_at: self.clock.now(),
            })
            .await?;
        Ok(redemption)
    }

    /// Catalog entries matching the filter, cheapest first
    pub async fn list_rewards(&self, filter: &RewardFilter) -> Result<Vec<Reward>, RedemptionError> {
        Ok(self.rewards.list_rewards(filter).await?)
    }

    pub async fn check_inventory(&self, reward_id: i64) -> Result<InventoryStatus, RedemptionError> {
        let reward = self
            .rewards
            .find_reward(reward_id)
            .await?
            .ok_or(RedemptionError::RewardNotFound(reward_id))?;
        Ok(InventoryStatus {
            reward_id,
            inventory_count: reward.inventory_count,
            is_active: reward.is_active,
        })
    }

    /// A shopper's redemptions, newest first
    pub async fn redemptions_for(&self, shopper_id: i64) -> Result<Vec<Redemption>, RedemptionError> {
        Ok(self.rewards.redemptions_for(shopper_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::ledger::Shopper;
    use crate::rewards::{RedemptionStatus, RewardType};
    use crate::rules::TierClassifier;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn shopper(id: i64, balance: i64) -> Shopper {
        let assignment = TierClassifier::classify(balance);
        Shopper {
            id,
            user_id: id,
            points_balance: balance,
            total_points_earned: balance,
            loyalty_tier: assignment.tier,
            tier_multiplier: assignment.multiplier,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reward(id: i64, cost: i64, inventory: i32) -> Reward {
        Reward {
            id,
            name: format!("Airtime {}", cost),
            description: None,
            reward_type: RewardType::Airtime,
            points_cost: cost,
            inventory_count: inventory,
            is_active: true,
        }
    }

    async fn service(store: Arc<MemoryStore>) -> RedemptionService {
        RedemptionService::new(store.clone(), store, Arc::new(SystemClock), EngineMetrics::new())
    }

    #[test]
    fn test_code_format() {
        let code = generate_redemption_code();
        assert!(code.starts_with("RDM-"));
        assert_eq!(code.len(), CODE_PREFIX.len() + CODE_LENGTH);
        assert!(code[4..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_ne!(code, generate_redemption_code());
    }

    #[tokio::test]
    async fn test_successful_redemption() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 1_000)).await;
        store.upsert_reward(reward(7, 600, 2)).await;
        let service = service(store.clone()).await;

        let redemption = service.redeem(1, 7).await.unwrap();
        assert_eq!(redemption.points_used, 600);
        assert_eq!(redemption.status, RedemptionStatus::Completed);
        assert!(redemption.code.starts_with(CODE_PREFIX));

        let shopper = store.find_shopper(1).await.unwrap().unwrap();
        assert_eq!(shopper.points_balance, 400);
        assert_eq!(shopper.total_points_earned, 1_000);
        assert_eq!(service.check_inventory(7).await.unwrap().inventory_count, 1);
        assert_eq!(service.redemptions_for(1).await.unwrap(), vec![redemption]);
    }

    #[tokio::test]
    async fn test_insufficient_balance_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 500)).await;
        store.upsert_reward(reward(7, 600, 3)).await;
        let service = service(store.clone()).await;

        let err = service.redeem(1, 7).await.unwrap_err();
        assert!(matches!(
            err,
            RedemptionError::InsufficientBalance { required: 600, available: 500 }
        ));
        assert_eq!(store.find_shopper(1).await.unwrap().unwrap().points_balance, 500);
        assert_eq!(service.check_inventory(7).await.unwrap().inventory_count, 3);
        assert!(service.redemptions_for(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_named_failures() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 5_000)).await;
        store.upsert_reward(reward(1, 100, 0)).await;
        store
            .upsert_reward(Reward {
                is_active: false,
                ..reward(2, 100, 5)
            })
            .await;
        store.upsert_reward(reward(3, 100, 5)).await;
        let service = service(store.clone()).await;

        assert!(matches!(service.redeem(1, 1).await, Err(RedemptionError::OutOfStock(1))));
        assert!(matches!(service.redeem(1, 2).await, Err(RedemptionError::RewardInactive(2))));
        assert!(matches!(service.redeem(1, 99).await, Err(RedemptionError::RewardNotFound(99))));
        assert!(matches!(service.redeem(42, 3).await, Err(RedemptionError::ShopperNotFound(42))));
        assert_eq!(store.find_shopper(1).await.unwrap().unwrap().points_balance, 5_000);
        assert_eq!(service.check_inventory(3).await.unwrap().inventory_count, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemptions_of_last_unit() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 10_000)).await;
        store.upsert_reward(reward(7, 100, 1)).await;
        let service = service(store.clone()).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.redeem(1, 7).await })
            })
            .collect();

        let mut succeeded = 0;
        let mut out_of_stock = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(RedemptionError::OutOfStock(7)) => out_of_stock += 1,
                Err(other) => panic!("unexpected error {}", other),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(out_of_stock, 15);
        assert_eq!(store.find_shopper(1).await.unwrap().unwrap().points_balance, 9_900);
        assert_eq!(store.entries(1, 100).await.unwrap().len(), 1);
        assert_eq!(service.check_inventory(7).await.unwrap().inventory_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemptions_drain_balance_once() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 250)).await;
        store.upsert_reward(reward(7, 100, 50)).await;
        let service = service(store.clone()).await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.redeem(1, 7).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(RedemptionError::InsufficientBalance { .. }) => {}
                Err(other) => panic!("unexpected error {}", other),
            }
        }
        assert_eq!(succeeded, 2);
        assert_eq!(store.find_shopper(1).await.unwrap().unwrap().points_balance, 50);
        assert_eq!(service.check_inventory(7).await.unwrap().inventory_count, 48);
    }

    #[tokio::test]
    async fn test_list_rewards_filters() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_reward(reward(1, 900, 1)).await;
        store.upsert_reward(reward(2, 100, 1)).await;
        store
            .upsert_reward(Reward {
                reward_type: RewardType::Voucher,
                ..reward(3, 300, 1)
            })
            .await;
        let service = service(store).await;

        let cheap_airtime = service
            .list_rewards(&RewardFilter {
                reward_type: Some(RewardType::Airtime),
                active_only: true,
                max_points: Some(500),
            })
            .await
            .unwrap();
        assert_eq!(cheap_airtime.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);

        let all = service.list_rewards(&RewardFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3, 1]);
    }
}
