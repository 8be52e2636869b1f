use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::ledger::{CreditOutcome, EntryKind, LedgerEntry, LedgerError, LedgerPosting, Shopper};
use crate::metrics::{EngineMetrics, Operation};
use crate::store::LedgerStore;

/// Largest journal page returned in one call
pub const MAX_JOURNAL_PAGE: i64 = 100;

/// Service for shopper balances outside of settlement and redemption
#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, metrics: EngineMetrics) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    /// Open a bronze account with a zero balance for a user
    pub async fn open_account(&self, user_id: i64) -> Result<Shopper, LedgerError> {
        if user_id < 1 {
            return Err(LedgerError::Validation(format!(
                "User id must be positive, got {}",
                user_id
            )));
        }
        let shopper = self.store.create_shopper(user_id).await?;
        tracing::info!(shopper_id = shopper.id, user_id, "Shopper account opened");
        Ok(shopper)
    }

    /// Add points to balance and lifetime total
    ///
    /// The tier is re-classified in the same unit as the balance change. A
    /// zero credit changes no balance and writes no journal entry.
    pub async fn credit(
        &self,
        shopper_id: i64,
        points: i64,
        reference_id: Option<Uuid>,
    ) -> Result<CreditOutcome, LedgerError> {
        let _timer = self.metrics.start(Operation::Credit);
        ensure_non_negative(points)?;

        let outcome = self
            .store
            .credit(&LedgerPosting {
                shopper_id,
                points,
                kind: EntryKind::ManualCredit,
                reference_id,
                at: self.clock.now(),
            })
            .await?;

        tracing::info!(
            shopper_id,
            points,
            balance = outcome.shopper.points_balance,
            tier = %outcome.shopper.loyalty_tier,
            "Points credited"
        );
        Ok(outcome)
    }

    /// Subtract points only if the balance covers them
    pub async fn debit(
        &self,
        shopper_id: i64,
        points: i64,
        reference_id: Option<Uuid>,
    ) -> Result<Shopper, LedgerError> {
        let _timer = self.metrics.start(Operation::Debit);
        ensure_non_negative(points)?;

        let result = self
            .store
            .debit(&LedgerPosting {
                shopper_id,
                points,
                kind: EntryKind::Debit,
                reference_id,
                at: self.clock.now(),
            })
            .await;

        match result {
            Ok(shopper) => {
                tracing::info!(
                    shopper_id,
                    points,
                    balance = shopper.points_balance,
                    "Points debited"
                );
                Ok(shopper)
            }
            Err(e) => {
                let err = LedgerError::from(e);
                if let LedgerError::InsufficientBalance { available, .. } = &err {
                    tracing::debug!(shopper_id, points, available, "Debit refused");
                }
                Err(err)
            }
        }
    }

    /// Spendable balance as last committed
    pub async fn balance(&self, shopper_id: i64) -> Result<i64, LedgerError> {
        Ok(self.shopper(shopper_id).await?.points_balance)
    }

    pub async fn shopper(&self, shopper_id: i64) -> Result<Shopper, LedgerError> {
        self.store
            .find_shopper(shopper_id)
            .await?
            .ok_or(LedgerError::ShopperNotFound(shopper_id))
    }

    /// Most recent journal entries first, at most 100
    pub async fn entries(&self, shopper_id: i64, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        let limit = limit.clamp(1, MAX_JOURNAL_PAGE);
        Ok(self.store.entries(shopper_id, limit).await?)
    }
}

fn ensure_non_negative(points: i64) -> Result<(), LedgerError> {
    if points < 0 {
        return Err(LedgerError::Validation(format!(
            "Points must not be negative, got {}",
            points
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::rules::{LoyaltyTier, TierClassifier};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ledger(store: Arc<MemoryStore>) -> PointsLedger {
        PointsLedger::new(store, Arc::new(SystemClock), EngineMetrics::new())
    }

    fn shopper(id: i64, balance: i64, total: i64) -> Shopper {
        let assignment = TierClassifier::classify(total);
        Shopper {
            id,
            user_id: id,
            points_balance: balance,
            total_points_earned: total,
            loyalty_tier: assignment.tier,
            tier_multiplier: assignment.multiplier,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_credit_across_silver_threshold_promotes() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 9_999, 9_999)).await;
        let ledger = ledger(store);

        let outcome = ledger.credit(1, 1, None).await.unwrap();
        assert!(outcome.promoted());
        assert_eq!(outcome.previous_tier, LoyaltyTier::Bronze);
        assert_eq!(outcome.shopper.total_points_earned, 10_000);
        assert_eq!(outcome.shopper.loyalty_tier, LoyaltyTier::Silver);
        assert_eq!(outcome.shopper.tier_multiplier, dec!(1.25));
    }

    #[tokio::test]
    async fn test_zero_credit_is_a_valid_no_op() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 40, 40)).await;
        let ledger = ledger(store);

        let outcome = ledger.credit(1, 0, None).await.unwrap();
        assert!(!outcome.promoted());
        assert_eq!(ledger.balance(1).await.unwrap(), 40);
        assert!(ledger.entries(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_amounts_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 40, 40)).await;
        let ledger = ledger(store);

        assert!(matches!(ledger.credit(1, -5, None).await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.debit(1, -5, None).await, Err(LedgerError::Validation(_))));
        assert_eq!(ledger.balance(1).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_debit_guard() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 500, 500)).await;
        let ledger = ledger(store);

        let err = ledger.debit(1, 600, None).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { requested: 600, available: 500 }
        ));
        assert_eq!(ledger.balance(1).await.unwrap(), 500);

        let shopper = ledger.debit(1, 500, None).await.unwrap();
        assert_eq!(shopper.points_balance, 0);
        assert_eq!(shopper.total_points_earned, 500);

        let entries = ledger.entries(1, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].delta, -500);
        assert_eq!(entries[0].balance_after, 0);
    }

    #[tokio::test]
    async fn test_unknown_shopper() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        assert!(matches!(ledger.balance(42).await, Err(LedgerError::ShopperNotFound(42))));
        assert!(matches!(
            ledger.credit(42, 10, None).await,
            Err(LedgerError::ShopperNotFound(42))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 100, 100)).await;
        let ledger = ledger(store);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.debit(1, 30, None).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::InsufficientBalance { .. }) => {}
                Err(other) => panic!("unexpected error {}", other),
            }
        }
        assert_eq!(succeeded, 3);
        assert_eq!(ledger.balance(1).await.unwrap(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_credits_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        store.insert_shopper(shopper(1, 0, 0)).await;
        let ledger = ledger(store);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.credit(1, 600, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let shopper = ledger.shopper(1).await.unwrap();
        assert_eq!(shopper.total_points_earned, 12_000);
        assert_eq!(shopper.loyalty_tier, LoyaltyTier::Silver);
    }
}
