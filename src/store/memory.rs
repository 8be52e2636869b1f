// In-process store
//
// Holds all state behind a single async mutex. Every trait method takes the lock
// once, checks all of its guards, and only then mutates, so a failed guard
// leaves the state untouched and concurrent callers see each operation whole.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::attendance::{AttendanceSummary, ClockRecord, NewClockRecord};
use crate::ledger::{CreditOutcome, EntryKind, LedgerEntry, LedgerPosting, Shopper};
use crate::receipts::{
    FingerprintClaim, Receipt, ReceiptLineItem, ReceiptStateMachine, ReceiptStatus,
};
use crate::rewards::{Redemption, RedemptionCommit, RedemptionStatus, Reward, RewardFilter};
use crate::rules::{BrandRule, LoyaltyTier, TierClassifier};
use crate::store::{
    ApprovalCommit, ApprovalRecord, AttendanceStore, BrandRuleSource, LedgerStore, ReceiptStore,
    RewardStore, StatusChange, StoreError,
};

#[derive(Debug, Clone)]
struct HeldFingerprint {
    receipt_id: Uuid,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    shoppers: HashMap<i64, Shopper>,
    next_shopper_id: i64,
    entries: Vec<LedgerEntry>,
    brand_rules: HashMap<i64, BrandRule>,
    receipts: HashMap<Uuid, Receipt>,
    line_items: Vec<ReceiptLineItem>,
    fingerprints: HashMap<String, HeldFingerprint>,
    rewards: HashMap<i64, Reward>,
    redemptions: Vec<Redemption>,
    clock_records: Vec<ClockRecord>,
}

impl MemoryState {
    fn shopper(&self, shopper_id: i64) -> Result<&Shopper, StoreError> {
        self.shoppers
            .get(&shopper_id)
            .ok_or_else(|| StoreError::not_found("Shopper", shopper_id))
    }

    fn push_entry(&mut self, posting: &LedgerPosting, delta: i64, balance_after: i64) {
        if delta == 0 {
            return;
        }
        let id = self.entries.len() as i64 + 1;
        self.entries.push(LedgerEntry {
            id,
            shopper_id: posting.shopper_id,
            delta,
            kind: posting.kind,
            reference_id: posting.reference_id,
            balance_after,
            created_at: posting.at,
        });
    }

    fn apply_credit(&mut self, posting: &LedgerPosting) -> Result<CreditOutcome, StoreError> {
        let current = self.shopper(posting.shopper_id)?;
        let overflow = || {
            StoreError::Database(sqlx::Error::Protocol(format!(
                "points overflow for shopper {}",
                posting.shopper_id
            )))
        };
        let balance = current.points_balance.checked_add(posting.points).ok_or_else(overflow)?;
        let total = current
            .total_points_earned
            .checked_add(posting.points)
            .ok_or_else(overflow)?;
        let previous_tier = current.loyalty_tier;
        let promotion = TierClassifier::check_promotion(total, previous_tier);

        let shopper = self
            .shoppers
            .get_mut(&posting.shopper_id)
            .ok_or_else(|| StoreError::not_found("Shopper", posting.shopper_id))?;
        shopper.points_balance = balance;
        shopper.total_points_earned = total;
        shopper.loyalty_tier = promotion.tier;
        shopper.tier_multiplier = promotion.multiplier;
        shopper.updated_at = posting.at;
        let shopper = shopper.clone();

        self.push_entry(posting, posting.points, balance);

        Ok(CreditOutcome {
            shopper,
            previous_tier,
            promotion,
        })
    }

    fn apply_debit(&mut self, posting: &LedgerPosting) -> Result<Shopper, StoreError> {
        let current = self.shopper(posting.shopper_id)?;
        if current.points_balance < posting.points {
            return Err(StoreError::InsufficientBalance {
                requested: posting.points,
                available: current.points_balance,
            });
        }

        let shopper = self
            .shoppers
            .get_mut(&posting.shopper_id)
            .ok_or_else(|| StoreError::not_found("Shopper", posting.shopper_id))?;
        shopper.points_balance -= posting.points;
        shopper.updated_at = posting.at;
        let shopper = shopper.clone();

        self.push_entry(posting, -posting.points, shopper.points_balance);
        Ok(shopper)
    }

    fn guarded_receipt(
        &self,
        receipt_id: Uuid,
        from: ReceiptStatus,
        to: ReceiptStatus,
    ) -> Result<&Receipt, StoreError> {
        let receipt = self
            .receipts
            .get(&receipt_id)
            .ok_or_else(|| StoreError::not_found("Receipt", receipt_id))?;
        if receipt.status != from || !ReceiptStateMachine::is_valid_transition(from, to) {
            return Err(StoreError::InvalidTransition {
                from: receipt.status,
                to,
            });
        }
        Ok(receipt)
    }
}

/// Store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a shopper row as-is
    pub async fn insert_shopper(&self, shopper: Shopper) {
        let mut state = self.state.lock().await;
        state.next_shopper_id = state.next_shopper_id.max(shopper.id);
        state.shoppers.insert(shopper.id, shopper);
    }

    pub async fn upsert_brand_rule(&self, rule: BrandRule) {
        self.state.lock().await.brand_rules.insert(rule.brand_id, rule);
    }

    pub async fn upsert_reward(&self, reward: Reward) {
        self.state.lock().await.rewards.insert(reward.id, reward);
    }
}

#[async_trait]
impl BrandRuleSource for MemoryStore {
    async fn load_brand_rules(&self) -> Result<Vec<BrandRule>, StoreError> {
        Ok(self.state.lock().await.brand_rules.values().cloned().collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_shopper(&self, user_id: i64) -> Result<Shopper, StoreError> {
        let mut state = self.state.lock().await;
        state.next_shopper_id += 1;
        let now = Utc::now();
        let tier = LoyaltyTier::Bronze;
        let shopper = Shopper {
            id: state.next_shopper_id,
            user_id,
            points_balance: 0,
            total_points_earned: 0,
            loyalty_tier: tier,
            tier_multiplier: tier.multiplier(),
            created_at: now,
            updated_at: now,
        };
        state.shoppers.insert(shopper.id, shopper.clone());
        Ok(shopper)
    }

    async fn find_shopper(&self, shopper_id: i64) -> Result<Option<Shopper>, StoreError> {
        Ok(self.state.lock().await.shoppers.get(&shopper_id).cloned())
    }

    async fn credit(&self, posting: &LedgerPosting) -> Result<CreditOutcome, StoreError> {
        self.state.lock().await.apply_credit(posting)
    }

    async fn debit(&self, posting: &LedgerPosting) -> Result<Shopper, StoreError> {
        self.state.lock().await.apply_debit(posting)
    }

    async fn entries(&self, shopper_id: i64, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.shopper_id == shopper_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn shoppers_with_balance(&self, after_id: i64, limit: i64) -> Result<Vec<Shopper>, StoreError> {
        let state = self.state.lock().await;
        let mut shoppers: Vec<Shopper> = state
            .shoppers
            .values()
            .filter(|s| s.id > after_id && s.points_balance > 0)
            .cloned()
            .collect();
        shoppers.sort_by_key(|s| s.id);
        shoppers.truncate(limit.max(0) as usize);
        Ok(shoppers)
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn insert_receipt(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.receipts.contains_key(&receipt.id) {
            return Err(StoreError::Conflict(format!("receipt {} already exists", receipt.id)));
        }
        state.receipts.insert(receipt.id, receipt.clone());
        Ok(())
    }

    async fn find_receipt(&self, receipt_id: Uuid) -> Result<Option<Receipt>, StoreError> {
        Ok(self.state.lock().await.receipts.get(&receipt_id).cloned())
    }

    async fn receipts_by_status(
        &self,
        status: ReceiptStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Receipt>, StoreError> {
        let state = self.state.lock().await;
        let mut receipts: Vec<Receipt> = state
            .receipts
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        receipts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(receipts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn line_items(&self, receipt_id: Uuid) -> Result<Vec<ReceiptLineItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .line_items
            .iter()
            .filter(|item| item.receipt_id == receipt_id)
            .cloned()
            .collect())
    }

    async fn claim_fingerprint(&self, claim: &FingerprintClaim) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(holder) = state.fingerprints.get(&claim.fingerprint) {
            if claim.is_blocked_by(holder.receipt_id, holder.submitted_at) {
                return Ok(false);
            }
        }
        state.fingerprints.insert(
            claim.fingerprint.clone(),
            HeldFingerprint {
                receipt_id: claim.receipt_id,
                submitted_at: claim.submitted_at,
            },
        );
        Ok(true)
    }

    async fn release_fingerprint(&self, receipt_id: Uuid) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .fingerprints
            .retain(|_, holder| holder.receipt_id != receipt_id);
        Ok(())
    }

    async fn change_status(&self, change: &StatusChange) -> Result<Receipt, StoreError> {
        let mut state = self.state.lock().await;
        let current = state.guarded_receipt(change.receipt_id, change.from, change.to)?;
        if change.to == ReceiptStatus::Approved {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: change.to,
            });
        }

        let receipt = state
            .receipts
            .get_mut(&change.receipt_id)
            .ok_or_else(|| StoreError::not_found("Receipt", change.receipt_id))?;
        receipt.status = change.to;
        receipt.rejection_reason = change.rejection_reason.clone();
        if change.processed_at.is_some() {
            receipt.processed_at = change.processed_at;
        }
        Ok(receipt.clone())
    }

    async fn commit_approval(&self, commit: &ApprovalCommit) -> Result<ApprovalRecord, StoreError> {
        let mut state = self.state.lock().await;
        let receipt = state.guarded_receipt(
            commit.receipt_id,
            commit.expected_status,
            ReceiptStatus::Approved,
        )?;
        if receipt.shopper_id != commit.shopper_id {
            return Err(StoreError::not_found("Shopper receipt", commit.receipt_id));
        }

        let credit = state.apply_credit(&LedgerPosting {
            shopper_id: commit.shopper_id,
            points: commit.points,
            kind: EntryKind::ReceiptCredit,
            reference_id: Some(commit.receipt_id),
            at: commit.processed_at,
        })?;

        let mut next_id = state.line_items.len() as i64;
        let items: Vec<ReceiptLineItem> = commit
            .items
            .iter()
            .map(|item| {
                next_id += 1;
                ReceiptLineItem {
                    id: next_id,
                    receipt_id: commit.receipt_id,
                    brand_id: item.brand_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                    points_calculated: item.points_calculated,
                }
            })
            .collect();
        state.line_items.extend(items);

        let receipt = state
            .receipts
            .get_mut(&commit.receipt_id)
            .ok_or_else(|| StoreError::not_found("Receipt", commit.receipt_id))?;
        receipt.status = ReceiptStatus::Approved;
        receipt.points_awarded = Some(commit.points);
        receipt.tier_multiplier_applied = Some(commit.tier_multiplier);
        receipt.flagged_for_audit = commit.flagged_for_audit;
        receipt.rejection_reason = None;
        receipt.processed_at = Some(commit.processed_at);

        Ok(ApprovalRecord {
            receipt: receipt.clone(),
            credit,
        })
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn find_reward(&self, reward_id: i64) -> Result<Option<Reward>, StoreError> {
        Ok(self.state.lock().await.rewards.get(&reward_id).cloned())
    }

    async fn list_rewards(&self, filter: &RewardFilter) -> Result<Vec<Reward>, StoreError> {
        let state = self.state.lock().await;
        let mut rewards: Vec<Reward> = state
            .rewards
            .values()
            .filter(|reward| filter.matches(reward))
            .cloned()
            .collect();
        rewards.sort_by_key(|reward| (reward.points_cost, reward.id));
        Ok(rewards)
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<Redemption, StoreError> {
        let mut state = self.state.lock().await;

        let reward = state
            .rewards
            .get(&commit.reward_id)
            .ok_or_else(|| StoreError::not_found("Reward", commit.reward_id))?;
        if !reward.is_active {
            return Err(StoreError::RewardInactive {
                reward_id: reward.id,
            });
        }
        if reward.inventory_count < 1 {
            return Err(StoreError::OutOfStock {
                reward_id: reward.id,
            });
        }
        let cost = reward.points_cost;

        // Debit checks its own guard before touching anything
        state.apply_debit(&LedgerPosting {
            shopper_id: commit.shopper_id,
            points: cost,
            kind: EntryKind::Redemption,
            reference_id: Some(commit.id),
            at: commit.redeemed_at,
        })?;

        if let Some(reward) = state.rewards.get_mut(&commit.reward_id) {
            reward.inventory_count -= 1;
        }

        let redemption = Redemption {
            id: commit.id,
            shopper_id: commit.shopper_id,
            reward_id: commit.reward_id,
            points_used: cost,
            status: RedemptionStatus::Completed,
            code: commit.code.clone(),
            created_at: commit.redeemed_at,
        };
        state.redemptions.push(redemption.clone());
        Ok(redemption)
    }

    async fn redemptions_for(&self, shopper_id: i64) -> Result<Vec<Redemption>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .redemptions
            .iter()
            .rev()
            .filter(|r| r.shopper_id == shopper_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn open_shift(&self, record: &NewClockRecord) -> Result<ClockRecord, StoreError> {
        let mut state = self.state.lock().await;
        let already_open = state.clock_records.iter().any(|r| {
            r.agent_id == record.agent_id && r.shift_date == record.shift_date && r.is_open()
        });
        if already_open {
            return Err(StoreError::AlreadyClockedIn {
                agent_id: record.agent_id,
            });
        }

        let clock_record = ClockRecord {
            id: state.clock_records.len() as i64 + 1,
            agent_id: record.agent_id,
            shift_date: record.shift_date,
            clock_in_at: record.clock_in_at,
            clock_out_at: None,
            is_late: record.is_late,
        };
        state.clock_records.push(clock_record.clone());
        Ok(clock_record)
    }

    async fn close_shift(
        &self,
        agent_id: i64,
        shift_date: NaiveDate,
        clock_out_at: DateTime<Utc>,
    ) -> Result<ClockRecord, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .clock_records
            .iter_mut()
            .rev()
            .find(|r| r.agent_id == agent_id && r.shift_date == shift_date && r.is_open())
            .ok_or(StoreError::NoActiveShift { agent_id })?;
        record.clock_out_at = Some(clock_out_at);
        Ok(record.clone())
    }

    async fn find_record(&self, agent_id: i64, shift_date: NaiveDate) -> Result<Option<ClockRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .clock_records
            .iter()
            .rev()
            .find(|r| r.agent_id == agent_id && r.shift_date == shift_date)
            .cloned())
    }

    async fn records(&self, agent_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<ClockRecord> = state
            .clock_records
            .iter()
            .filter(|r| r.agent_id == agent_id && r.shift_date >= from && r.shift_date <= to)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.shift_date.cmp(&a.shift_date).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn late_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<ClockRecord> = state
            .clock_records
            .iter()
            .filter(|r| r.is_late && r.shift_date >= from && r.shift_date <= to)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.shift_date.cmp(&a.shift_date).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn attendance_summary(
        &self,
        agent_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AttendanceSummary, StoreError> {
        let records = self.records(agent_id, from, to).await?;
        Ok(AttendanceSummary::from_records(&records))
    }
}
