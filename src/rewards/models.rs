use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of reward in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    Airtime,
    Voucher,
    Data,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Airtime => "airtime",
            RewardType::Voucher => "voucher",
            RewardType::Data => "data",
        }
    }
}

impl std::fmt::Display for RewardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Redemption status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Completed,
    Failed,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Completed => "completed",
            RedemptionStatus::Failed => "failed",
        }
    }
}

impl Default for RedemptionStatus {
    fn default() -> Self {
        RedemptionStatus::Pending
    }
}

impl std::fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog entry owned by reward administration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Reward {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub reward_type: RewardType,
    pub points_cost: i64,
    pub inventory_count: i32,
    pub is_active: bool,
}

/// A completed redemption; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Redemption {
    pub id: Uuid,
    pub shopper_id: i64,
    pub reward_id: i64,
    /// Reward cost at the moment of redemption
    pub points_used: i64,
    pub status: RedemptionStatus,
    /// Opaque fulfillment token handed to the shopper
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Catalog query used by `list_rewards`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardFilter {
    pub reward_type: Option<RewardType>,
    pub active_only: bool,
    /// Only rewards costing at most this many points
    pub max_points: Option<i64>,
}

impl RewardFilter {
    pub fn matches(&self, reward: &Reward) -> bool {
        self.reward_type.map_or(true, |t| reward.reward_type == t)
            && (!self.active_only || reward.is_active)
            && self.max_points.map_or(true, |max| reward.points_cost <= max)
    }
}

/// Inventory snapshot for one reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InventoryStatus {
    pub reward_id: i64,
    pub inventory_count: i32,
    pub is_active: bool,
}

impl InventoryStatus {
    pub fn available(&self) -> bool {
        self.is_active && self.inventory_count >= 1
    }
}

/// Everything the store needs to commit a redemption in one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionCommit {
    pub id: Uuid,
    pub shopper_id: i64,
    pub reward_id: i64,
    pub code: String,
    pub redeemed_at: DateTime<Utc>,
}
