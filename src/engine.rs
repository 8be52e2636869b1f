// Loyalty Engine - Orchestrator
//
// Wires the settlement pipeline, points ledger, redemption service and
// attendance clock onto one store, one clock and one notification dispatcher,
// and announces credits and promotions after they commit.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::attendance::AttendanceClock;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::jobs::{ExpirationWarningJob, LateClockInReport};
use crate::ledger::{CreditOutcome, LedgerError, PointsLedger};
use crate::metrics::EngineMetrics;
use crate::notifications::{
    dispatch_quietly, LoyaltyEvent, NotificationDispatcher, PgNotificationOutbox, TracingDispatcher,
};
use crate::receipts::{LineItem, NewReceipt, Receipt, SettlementError, SettlementOutcome, SettlementPipeline};
use crate::rewards::{Redemption, RedemptionError, RedemptionService};
use crate::rules::BrandRuleCache;
use crate::store::{
    AttendanceStore, BrandRuleSource, LedgerStore, MemoryStore, PgStore, ReceiptStore, RewardStore,
    StoreError,
};

/// Loyalty Engine
///
/// Cheap to clone; clones share the store, cache and metrics.
#[derive(Clone)]
pub struct LoyaltyEngine {
    settlement: SettlementPipeline,
    ledger: PointsLedger,
    redemptions: RedemptionService,
    attendance: AttendanceClock,
    ledger_store: Arc<dyn LedgerStore>,
    brand_rules: Arc<BrandRuleCache>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    metrics: EngineMetrics,
}

impl LoyaltyEngine {
    /// Create an engine over any store implementing every storage seam
    pub fn new<S>(
        store: Arc<S>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self
    where
        S: BrandRuleSource + LedgerStore + ReceiptStore + RewardStore + AttendanceStore + 'static,
    {
        let metrics = EngineMetrics::new();
        let brand_rules = Arc::new(BrandRuleCache::with_metrics(
            store.clone(),
            config.brand_rule_cache_ttl,
            metrics.clone(),
        ));

        Self {
            settlement: SettlementPipeline::new(
                store.clone(),
                store.clone(),
                brand_rules.clone(),
                notifier.clone(),
                clock.clone(),
                config.settlement.clone(),
                metrics.clone(),
            ),
            ledger: PointsLedger::new(store.clone(), clock.clone(), metrics.clone()),
            redemptions: RedemptionService::new(store.clone(), store.clone(), clock.clone(), metrics.clone()),
            attendance: AttendanceClock::new(
                store.clone(),
                clock.clone(),
                config.shift.clone(),
                metrics.clone(),
            ),
            ledger_store: store,
            brand_rules,
            notifier,
            clock,
            config,
            metrics,
        }
    }

    /// Production wiring: Postgres store and notification outbox
    pub fn postgres(pool: PgPool, config: EngineConfig) -> Self {
        Self::new(
            Arc::new(PgStore::new(pool.clone())),
            Arc::new(PgNotificationOutbox::new(pool)),
            Arc::new(SystemClock),
            config,
        )
    }

    /// In-process engine; the returned store is used to seed brands, rewards
    /// and shoppers
    pub fn in_memory(config: EngineConfig) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Self::new(
            store.clone(),
            Arc::new(TracingDispatcher),
            Arc::new(SystemClock),
            config,
        );
        (engine, store)
    }

    /// Load the brand rule snapshot ahead of the first settlement
    pub async fn warm_cache(&self) -> Result<usize, StoreError> {
        let rules = self.brand_rules.snapshot().await?;
        tracing::info!(brands = rules.len(), "Brand rule cache warmed");
        Ok(rules.len())
    }

    pub fn settlement(&self) -> &SettlementPipeline {
        &self.settlement
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    pub fn redemptions(&self) -> &RedemptionService {
        &self.redemptions
    }

    pub fn attendance(&self) -> &AttendanceClock {
        &self.attendance
    }

    pub fn brand_rules(&self) -> &BrandRuleCache {
        &self.brand_rules
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn submit_receipt(&self, submission: NewReceipt) -> Result<Receipt, SettlementError> {
        self.settlement.submit(submission).await
    }

    /// Settle a pending receipt and announce any credit or promotion
    pub async fn settle_receipt(
        &self,
        receipt_id: Uuid,
        items: &[LineItem],
    ) -> Result<SettlementOutcome, SettlementError> {
        let outcome = self.settlement.settle(receipt_id, items).await?;
        self.announce(&outcome).await;
        Ok(outcome)
    }

    /// Reviewer approval, announced like an automatic one
    pub async fn approve_receipt(
        &self,
        receipt_id: Uuid,
        items: &[LineItem],
    ) -> Result<SettlementOutcome, SettlementError> {
        let outcome = self.settlement.approve(receipt_id, items).await?;
        self.announce(&outcome).await;
        Ok(outcome)
    }

    pub async fn reject_receipt(&self, receipt_id: Uuid, reason: &str) -> Result<Receipt, SettlementError> {
        self.settlement.reject(receipt_id, reason).await
    }

    pub async fn flag_receipt(&self, receipt_id: Uuid) -> Result<Receipt, SettlementError> {
        self.settlement.flag(receipt_id).await
    }

    /// Manual credit; a resulting promotion is announced
    pub async fn credit_points(&self, shopper_id: i64, points: i64) -> Result<CreditOutcome, LedgerError> {
        let outcome = self.ledger.credit(shopper_id, points, None).await?;
        self.announce_promotion(&outcome).await;
        Ok(outcome)
    }

    pub async fn redeem(&self, shopper_id: i64, reward_id: i64) -> Result<Redemption, RedemptionError> {
        self.redemptions.redeem(shopper_id, reward_id).await
    }

    pub async fn balance(&self, shopper_id: i64) -> Result<i64, LedgerError> {
        self.ledger.balance(shopper_id).await
    }

    /// Points-expiry warning job bound to this engine's store and dispatcher
    pub fn expiration_warnings(&self) -> ExpirationWarningJob {
        ExpirationWarningJob::new(
            self.ledger_store.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.config.shift.site_offset,
        )
    }

    pub fn late_clock_in_report(&self) -> LateClockInReport {
        LateClockInReport::new(self.attendance.clone(), self.clock.clone())
    }

    async fn announce(&self, outcome: &SettlementOutcome) {
        let SettlementOutcome::Approved(summary) = outcome else {
            return;
        };

        if summary.points_awarded > 0 {
            dispatch_quietly(
                self.notifier.as_ref(),
                LoyaltyEvent::PointsAwarded {
                    shopper_id: summary.receipt.shopper_id,
                    points: summary.points_awarded,
                    receipt_id: summary.receipt.id,
                },
            )
            .await;
        }
        self.announce_promotion(&summary.credit).await;
    }

    async fn announce_promotion(&self, credit: &CreditOutcome) {
        if !credit.promoted() {
            return;
        }
        tracing::info!(
            shopper_id = credit.shopper.id,
            from = %credit.previous_tier,
            to = %credit.promotion.tier,
            "Shopper promoted"
        );
        dispatch_quietly(
            self.notifier.as_ref(),
            LoyaltyEvent::TierPromoted {
                shopper_id: credit.shopper.id,
                tier: credit.promotion.tier,
                multiplier: credit.promotion.multiplier,
            },
        )
        .await;
    }
}
