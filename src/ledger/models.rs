use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::rules::{LoyaltyTier, PromotionCheck};

/// Per-shopper ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Shopper {
    pub id: i64,
    pub user_id: i64,
    /// Spendable points
    pub points_balance: i64,
    /// Lifetime points; never decreases
    pub total_points_earned: i64,
    pub loyalty_tier: LoyaltyTier,
    pub tier_multiplier: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What moved a shopper's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Points awarded for an approved receipt
    ReceiptCredit,
    /// Administrative credit
    ManualCredit,
    /// Administrative debit
    Debit,
    /// Points spent on a reward
    Redemption,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::ReceiptCredit => "receipt_credit",
            EntryKind::ManualCredit => "manual_credit",
            EntryKind::Debit => "debit",
            EntryKind::Redemption => "redemption",
        }
    }

    pub fn is_credit(&self) -> bool {
        matches!(self, EntryKind::ReceiptCredit | EntryKind::ManualCredit)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of the points journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub shopper_id: i64,
    /// Signed change: positive for credits, negative for debits
    pub delta: i64,
    pub kind: EntryKind,
    /// Receipt or redemption that caused the entry
    pub reference_id: Option<Uuid>,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// A balance movement to apply atomically with its journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub shopper_id: i64,
    /// Always non-negative; the direction comes from `kind`
    pub points: i64,
    pub kind: EntryKind,
    pub reference_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Shopper state after a credit together with the tier re-evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditOutcome {
    pub shopper: Shopper,
    pub previous_tier: LoyaltyTier,
    pub promotion: PromotionCheck,
}

impl CreditOutcome {
    pub fn promoted(&self) -> bool {
        self.promotion.promoted
    }
}
