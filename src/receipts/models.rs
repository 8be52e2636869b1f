use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::validation::{validate_money_amount, validate_receipt_number};

/// Receipt status enum representing the settlement lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Approved,
    Rejected,
    Flagged,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Approved => "approved",
            ReceiptStatus::Rejected => "rejected",
            ReceiptStatus::Flagged => "flagged",
        }
    }

    /// Parse status from string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReceiptStatus::Pending),
            "approved" => Ok(ReceiptStatus::Approved),
            "rejected" => Ok(ReceiptStatus::Rejected),
            "flagged" => Ok(ReceiptStatus::Flagged),
            _ => Err(format!("Invalid receipt status: {}", s)),
        }
    }
}

impl Default for ReceiptStatus {
    fn default() -> Self {
        ReceiptStatus::Pending
    }
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel a receipt was captured through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    /// In-app camera capture, the preferred channel
    Phone,
    /// Forwarded e-receipt
    Email,
}

impl CaptureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMethod::Phone => "phone",
            CaptureMethod::Email => "email",
        }
    }
}

impl std::fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a receipt was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum RejectionReason {
    /// Same receipt number, store and total seen inside the duplicate window
    Duplicate,
    /// Reviewer decision with a free-text note
    Reviewer(String),
}

impl RejectionReason {
    /// Text stored on the receipt row
    pub fn as_text(&self) -> String {
        match self {
            RejectionReason::Duplicate => "duplicate".to_string(),
            RejectionReason::Reviewer(note) => note.clone(),
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// Domain model representing a submitted receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Receipt {
    pub id: Uuid,
    pub shopper_id: i64,
    pub store_id: i64,
    pub receipt_number: Option<String>,
    pub total_amount: Decimal,
    pub capture_method: CaptureMethod,
    pub image_path: Option<String>,
    pub quality_score: i32,
    pub status: ReceiptStatus,
    pub points_awarded: Option<i64>,
    pub tier_multiplier_applied: Option<Decimal>,
    pub flagged_for_audit: bool,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Upload metadata handed over by the capture apps
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReceipt {
    #[validate(range(min = 1, message = "Shopper id must be positive"))]
    pub shopper_id: i64,
    #[validate(range(min = 1, message = "Store id must be positive"))]
    pub store_id: i64,
    #[validate(custom = "validate_receipt_number")]
    pub receipt_number: Option<String>,
    #[validate(custom = "validate_money_amount")]
    pub total_amount: Decimal,
    pub capture_method: CaptureMethod,
    /// Storage path from the upload layer; `None` when no image was stored
    pub image_path: Option<String>,
}

/// A line item as read off the receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LineItem {
    pub brand_id: i64,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(custom = "validate_money_amount")]
    pub unit_price: Decimal,
    #[validate(custom = "validate_money_amount")]
    pub line_total: Decimal,
}

/// A line item with the points it earned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLineItem {
    pub brand_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub points_calculated: i64,
}

/// Persisted line item belonging to an approved receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReceiptLineItem {
    pub id: i64,
    pub receipt_id: Uuid,
    pub brand_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub points_calculated: i64,
}
