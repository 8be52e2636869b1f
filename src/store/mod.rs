// Storage seams
//
// Every durable read and guarded write the engine performs goes through these
// traits. Each mutating method is one atomic unit: it either applies all of its
// effects or none of them, and guard failures come back as typed errors.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::attendance::{AttendanceSummary, ClockRecord, NewClockRecord};
use crate::ledger::{CreditOutcome, LedgerEntry, LedgerPosting, Shopper};
use crate::receipts::{FingerprintClaim, PricedLineItem, Receipt, ReceiptLineItem, ReceiptStatus};
use crate::rewards::{Redemption, RedemptionCommit, Reward, RewardFilter};
use crate::rules::BrandRule;

/// Approval of one receipt together with its ledger credit
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalCommit {
    pub receipt_id: Uuid,
    /// Status the receipt must still have when the commit lands
    pub expected_status: ReceiptStatus,
    pub shopper_id: i64,
    pub items: Vec<PricedLineItem>,
    pub points: i64,
    pub tier_multiplier: Decimal,
    pub flagged_for_audit: bool,
    pub processed_at: DateTime<Utc>,
}

/// Guarded status change without a ledger effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub receipt_id: Uuid,
    pub from: ReceiptStatus,
    pub to: ReceiptStatus,
    pub rejection_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Receipt and ledger state after an approval commit
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub receipt: Receipt,
    pub credit: CreditOutcome,
}

/// Read-only access to the brand administration table
#[async_trait]
pub trait BrandRuleSource: Send + Sync {
    async fn load_brand_rules(&self) -> Result<Vec<BrandRule>, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a bronze account with zero balance
    async fn create_shopper(&self, user_id: i64) -> Result<Shopper, StoreError>;

    async fn find_shopper(&self, shopper_id: i64) -> Result<Option<Shopper>, StoreError>;

    /// Add to balance and lifetime total, re-classify the tier and journal the
    /// posting, all in one unit
    async fn credit(&self, posting: &LedgerPosting) -> Result<CreditOutcome, StoreError>;

    /// Subtract from the balance only if it covers `posting.points`
    async fn debit(&self, posting: &LedgerPosting) -> Result<Shopper, StoreError>;

    /// Most recent journal entries first
    async fn entries(&self, shopper_id: i64, limit: i64) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Shoppers with a positive balance and id greater than `after_id`, by id
    async fn shoppers_with_balance(&self, after_id: i64, limit: i64) -> Result<Vec<Shopper>, StoreError>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert_receipt(&self, receipt: &Receipt) -> Result<(), StoreError>;

    async fn find_receipt(&self, receipt_id: Uuid) -> Result<Option<Receipt>, StoreError>;

    /// Oldest first, so review queues are worked in submission order
    async fn receipts_by_status(
        &self,
        status: ReceiptStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Receipt>, StoreError>;

    async fn line_items(&self, receipt_id: Uuid) -> Result<Vec<ReceiptLineItem>, StoreError>;

    /// Atomically hold a duplicate fingerprint; `false` when another receipt
    /// inside the window holds it
    async fn claim_fingerprint(&self, claim: &FingerprintClaim) -> Result<bool, StoreError>;

    async fn release_fingerprint(&self, receipt_id: Uuid) -> Result<(), StoreError>;

    /// Move a receipt between two non-approved statuses
    async fn change_status(&self, change: &StatusChange) -> Result<Receipt, StoreError>;

    /// Approve the receipt, persist its line items and credit the shopper
    async fn commit_approval(&self, commit: &ApprovalCommit) -> Result<ApprovalRecord, StoreError>;
}

#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn find_reward(&self, reward_id: i64) -> Result<Option<Reward>, StoreError>;

    /// Cheapest first
    async fn list_rewards(&self, filter: &RewardFilter) -> Result<Vec<Reward>, StoreError>;

    /// Reserve one unit of stock, debit the shopper by the reward's cost and
    /// record the redemption; nothing is applied if either guard fails
    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<Redemption, StoreError>;

    async fn redemptions_for(&self, shopper_id: i64) -> Result<Vec<Redemption>, StoreError>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Fails with `AlreadyClockedIn` when the agent has an open record for the date
    async fn open_shift(&self, record: &NewClockRecord) -> Result<ClockRecord, StoreError>;

    /// Fails with `NoActiveShift` when no open record exists for the date
    async fn close_shift(
        &self,
        agent_id: i64,
        shift_date: NaiveDate,
        clock_out_at: DateTime<Utc>,
    ) -> Result<ClockRecord, StoreError>;

    /// Latest record for the agent on the date
    async fn find_record(&self, agent_id: i64, shift_date: NaiveDate) -> Result<Option<ClockRecord>, StoreError>;

    /// Agent's records between two dates inclusive, newest first
    async fn records(&self, agent_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, StoreError>;

    /// Late records of all agents between two dates inclusive, newest first
    async fn late_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, StoreError>;

    async fn attendance_summary(
        &self,
        agent_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AttendanceSummary, StoreError>;
}
