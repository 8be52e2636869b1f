// Shopper notifications
//
// The engine emits typed events; delivery belongs to the notification
// collaborator. Delivery is fire-and-forget: a failure is logged and never
// undoes the ledger or receipt change that produced the event.

pub mod outbox;

pub use outbox::PgNotificationOutbox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::rules::LoyaltyTier;

/// Error types for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Notification urgency shown to the shopper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// Everything the engine tells shoppers about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoyaltyEvent {
    PointsAwarded {
        shopper_id: i64,
        points: i64,
        receipt_id: Uuid,
    },
    TierPromoted {
        shopper_id: i64,
        tier: LoyaltyTier,
        multiplier: Decimal,
    },
    ReceiptFlagged {
        shopper_id: i64,
        receipt_id: Uuid,
    },
    ReceiptRejected {
        shopper_id: i64,
        receipt_id: Uuid,
        reason: String,
    },
    PointsExpiring {
        shopper_id: i64,
        points: i64,
        expires_at: DateTime<Utc>,
    },
}

impl LoyaltyEvent {
    pub fn shopper_id(&self) -> i64 {
        match self {
            LoyaltyEvent::PointsAwarded { shopper_id, .. }
            | LoyaltyEvent::TierPromoted { shopper_id, .. }
            | LoyaltyEvent::ReceiptFlagged { shopper_id, .. }
            | LoyaltyEvent::ReceiptRejected { shopper_id, .. }
            | LoyaltyEvent::PointsExpiring { shopper_id, .. } => *shopper_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LoyaltyEvent::PointsAwarded { .. } => "points_awarded",
            LoyaltyEvent::TierPromoted { .. } => "tier_promotion",
            LoyaltyEvent::ReceiptFlagged { .. } => "receipt_flagged",
            LoyaltyEvent::ReceiptRejected { .. } => "receipt_rejected",
            LoyaltyEvent::PointsExpiring { .. } => "points_expiring",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            LoyaltyEvent::TierPromoted { .. } | LoyaltyEvent::PointsExpiring { .. } => Priority::High,
            _ => Priority::Medium,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            LoyaltyEvent::PointsAwarded { points, .. } => format!("{} Points Awarded!", points),
            LoyaltyEvent::TierPromoted { tier, .. } => {
                format!("Congratulations! Promoted to {} tier", tier.as_str().to_uppercase())
            }
            LoyaltyEvent::ReceiptFlagged { .. } => "Receipt Flagged for Review".to_string(),
            LoyaltyEvent::ReceiptRejected { .. } => "Receipt Rejected".to_string(),
            LoyaltyEvent::PointsExpiring { .. } => "Your Points Are Expiring Soon!".to_string(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            LoyaltyEvent::PointsAwarded { points, receipt_id, .. } => format!(
                "You've earned {} points for receipt {}. Keep shopping to earn more!",
                points, receipt_id
            ),
            LoyaltyEvent::TierPromoted { tier, multiplier, .. } => format!(
                "You've been promoted to {} tier! Your purchases now earn {}x points.",
                tier, multiplier
            ),
            LoyaltyEvent::ReceiptFlagged { receipt_id, .. } => format!(
                "Your receipt #{} has been flagged for manual review. This is a routine quality check.",
                receipt_id
            ),
            LoyaltyEvent::ReceiptRejected { receipt_id, reason, .. } => {
                format!("Your receipt #{} was rejected: {}.", receipt_id, reason)
            }
            LoyaltyEvent::PointsExpiring { points, expires_at, .. } => format!(
                "{} points will expire on {}. Redeem them now!",
                points,
                expires_at.format("%Y-%m-%d")
            ),
        }
    }
}

/// Delivery seam for shopper notifications
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &LoyaltyEvent) -> Result<(), NotificationError>;
}

/// Deliver an event, logging instead of propagating failures
pub async fn dispatch_quietly(dispatcher: &dyn NotificationDispatcher, event: LoyaltyEvent) {
    if let Err(e) = dispatcher.dispatch(&event).await {
        tracing::warn!(
            kind = event.kind(),
            shopper_id = event.shopper_id(),
            "Failed to deliver notification: {}",
            e
        );
    }
}

/// Dispatcher that only writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn dispatch(&self, event: &LoyaltyEvent) -> Result<(), NotificationError> {
        tracing::info!(
            kind = event.kind(),
            shopper_id = event.shopper_id(),
            priority = event.priority().as_str(),
            "{}",
            event.subject()
        );
        Ok(())
    }
}

/// Dispatcher that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<LoyaltyEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered so far, oldest first
    pub fn events(&self) -> Vec<LoyaltyEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &LoyaltyEvent) -> Result<(), NotificationError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}
