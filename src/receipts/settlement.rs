// Receipt settlement
//
// Drives a stored receipt from `pending` to approved, rejected or flagged. The
// duplicate gate holds a fingerprint claim in the store, so two identical
// receipts settled concurrently cannot both pass it. Approval and the ledger
// credit land in one store commit.

use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::config::SettlementPolicy;
use crate::ledger::CreditOutcome;
use crate::metrics::{EngineMetrics, Operation};
use crate::notifications::{dispatch_quietly, LoyaltyEvent, NotificationDispatcher};
use crate::receipts::{
    FingerprintClaim, LineItem, NewReceipt, QualityScorer, QualitySignals, Receipt, ReceiptLineItem,
    ReceiptStatus, RejectionReason, SettlementError,
};
use crate::rules::{BrandRuleCache, PointsCalculator};
use crate::store::{ApprovalCommit, LedgerStore, ReceiptStore, StatusChange, StoreError};

/// Largest page the review queue listing hands out
pub const MAX_PAGE_SIZE: i64 = 100;

/// Approved receipt together with the credit it produced
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalSummary {
    pub receipt: Receipt,
    pub points_awarded: i64,
    pub tier_multiplier: Decimal,
    /// Approved by the automatic gates with a quality score at or above the
    /// auto-approve threshold
    pub auto_approved: bool,
    pub audit_sampled: bool,
    pub credit: CreditOutcome,
}

/// Terminal or review-pending result of a settlement
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Approved(ApprovalSummary),
    /// Requires manual review; nothing was priced or credited
    Flagged { receipt_id: Uuid, quality_score: i32 },
    Rejected { receipt_id: Uuid, reason: RejectionReason },
}

impl SettlementOutcome {
    pub fn receipt_id(&self) -> Uuid {
        match self {
            SettlementOutcome::Approved(summary) => summary.receipt.id,
            SettlementOutcome::Flagged { receipt_id, .. }
            | SettlementOutcome::Rejected { receipt_id, .. } => *receipt_id,
        }
    }

    pub fn status(&self) -> ReceiptStatus {
        match self {
            SettlementOutcome::Approved(_) => ReceiptStatus::Approved,
            SettlementOutcome::Flagged { .. } => ReceiptStatus::Flagged,
            SettlementOutcome::Rejected { .. } => ReceiptStatus::Rejected,
        }
    }

    pub fn points_awarded(&self) -> i64 {
        match self {
            SettlementOutcome::Approved(summary) => summary.points_awarded,
            _ => 0,
        }
    }
}

/// How an approval was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalPath {
    Automatic,
    Reviewer,
}

/// Service for receipt ingest, settlement and review
#[derive(Clone)]
pub struct SettlementPipeline {
    receipts: Arc<dyn ReceiptStore>,
    ledger: Arc<dyn LedgerStore>,
    brand_rules: Arc<BrandRuleCache>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    policy: SettlementPolicy,
    metrics: EngineMetrics,
}

impl SettlementPipeline {
    pub fn new(
        receipts: Arc<dyn ReceiptStore>,
        ledger: Arc<dyn LedgerStore>,
        brand_rules: Arc<BrandRuleCache>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        policy: SettlementPolicy,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            receipts,
            ledger,
            brand_rules,
            notifier,
            clock,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    /// Persist an uploaded receipt as `pending` with its quality score
    ///
    /// # Validation
    /// - Total amount is not negative, in whole cents and below 10^10
    /// - Receipt number, when given, is at most 64 characters of `[A-Za-z0-9-/]`
    /// - The shopper must exist
    pub async fn submit(&self, submission: NewReceipt) -> Result<Receipt, SettlementError> {
        submission.validate()?;

        if self.ledger.find_shopper(submission.shopper_id).await?.is_none() {
            return Err(SettlementError::ShopperNotFound(submission.shopper_id));
        }

        let quality_score = QualityScorer::score(QualitySignals::from_submission(&submission));
        let receipt_number = submission
            .receipt_number
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let image_path = submission.image_path.filter(|p| !p.trim().is_empty());

        let receipt = Receipt {
            id: Uuid::new_v4(),
            shopper_id: submission.shopper_id,
            store_id: submission.store_id,
            receipt_number,
            total_amount: submission.total_amount,
            capture_method: submission.capture_method,
            image_path,
            quality_score,
            status: ReceiptStatus::Pending,
            points_awarded: None,
            tier_multiplier_applied: None,
            flagged_for_audit: false,
            rejection_reason: None,
            created_at: self.clock.now(),
            processed_at: None,
        };
        self.receipts.insert_receipt(&receipt).await?;

        tracing::info!(
            receipt_id = %receipt.id,
            shopper_id = receipt.shopper_id,
            quality_score,
            "Receipt submitted"
        );
        Ok(receipt)
    }

    /// Run the automatic gates over a pending receipt
    ///
    /// Low quality flags the receipt for review, a held fingerprint rejects it
    /// as a duplicate, and everything else is priced at the shopper's current
    /// multiplier and credited in the same commit as the approval.
    pub async fn settle(
        &self,
        receipt_id: Uuid,
        items: &[LineItem],
    ) -> Result<SettlementOutcome, SettlementError> {
        let _timer = self.metrics.start(Operation::Settlement);
        validate_items(items)?;

        let receipt = self.load(receipt_id).await?;
        match receipt.status {
            ReceiptStatus::Pending => {}
            ReceiptStatus::Flagged => return Err(SettlementError::AwaitingReview(receipt_id)),
            status => return Err(SettlementError::AlreadySettled { receipt_id, status }),
        }

        if receipt.quality_score < self.policy.quality_threshold {
            if !self.claim(&receipt).await? {
                return self.reject_duplicate(&receipt).await;
            }
            return self.flag_receipt(&receipt).await;
        }

        self.approve_receipt(receipt, items, ApprovalPath::Automatic).await
    }

    /// Reviewer approval of a pending or flagged receipt
    ///
    /// Skips the quality gate but still runs the duplicate gate.
    pub async fn approve(
        &self,
        receipt_id: Uuid,
        items: &[LineItem],
    ) -> Result<SettlementOutcome, SettlementError> {
        let _timer = self.metrics.start(Operation::Settlement);
        validate_items(items)?;

        let receipt = self.load(receipt_id).await?;
        ensure_reviewable(&receipt)?;
        self.approve_receipt(receipt, items, ApprovalPath::Reviewer).await
    }

    /// Reviewer rejection of a pending or flagged receipt
    pub async fn reject(&self, receipt_id: Uuid, reason: &str) -> Result<Receipt, SettlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation(
                "Rejection reason must not be empty".to_string(),
            ));
        }

        let receipt = self.load(receipt_id).await?;
        ensure_reviewable(&receipt)?;

        let rejected = self
            .transition(&receipt, ReceiptStatus::Rejected, Some(reason.to_string()))
            .await?;

        // A held fingerprint only blocks resubmission until the window passes
        if let Err(e) = self.receipts.release_fingerprint(receipt_id).await {
            tracing::warn!(receipt_id = %receipt_id, "Failed to release fingerprint: {}", e);
        }

        self.metrics.record_receipt_rejected();
        tracing::info!(receipt_id = %receipt_id, reason, "Receipt rejected by reviewer");
        dispatch_quietly(
            self.notifier.as_ref(),
            LoyaltyEvent::ReceiptRejected {
                shopper_id: rejected.shopper_id,
                receipt_id,
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(rejected)
    }

    /// Manually move a pending receipt into the review queue
    pub async fn flag(&self, receipt_id: Uuid) -> Result<Receipt, SettlementError> {
        let receipt = self.load(receipt_id).await?;
        if receipt.status != ReceiptStatus::Pending {
            return Err(SettlementError::InvalidTransition {
                from: receipt.status,
                to: ReceiptStatus::Flagged,
            });
        }

        let flagged = self.transition(&receipt, ReceiptStatus::Flagged, None).await?;
        self.metrics.record_receipt_flagged();
        tracing::info!(receipt_id = %receipt_id, "Receipt flagged by reviewer");
        dispatch_quietly(
            self.notifier.as_ref(),
            LoyaltyEvent::ReceiptFlagged {
                shopper_id: flagged.shopper_id,
                receipt_id,
            },
        )
        .await;
        Ok(flagged)
    }

    pub async fn receipt(&self, receipt_id: Uuid) -> Result<Receipt, SettlementError> {
        self.load(receipt_id).await
    }

    /// One page of receipts in a status, oldest first
    ///
    /// Pages start at 1; the page size is clamped to 1..=100.
    pub async fn receipts_by_status(
        &self,
        status: ReceiptStatus,
        page: i64,
        per_page: i64,
    ) -> Result<Vec<Receipt>, SettlementError> {
        let limit = per_page.clamp(1, MAX_PAGE_SIZE);
        let offset = (page.max(1) - 1).saturating_mul(limit);
        Ok(self.receipts.receipts_by_status(status, limit, offset).await?)
    }

    pub async fn line_items(&self, receipt_id: Uuid) -> Result<Vec<ReceiptLineItem>, SettlementError> {
        Ok(self.receipts.line_items(receipt_id).await?)
    }

    async fn load(&self, receipt_id: Uuid) -> Result<Receipt, SettlementError> {
        self.receipts
            .find_receipt(receipt_id)
            .await?
            .ok_or(SettlementError::ReceiptNotFound(receipt_id))
    }

    /// Hold the receipt's fingerprint; receipts without a number always pass
    async fn claim(&self, receipt: &Receipt) -> Result<bool, SettlementError> {
        match FingerprintClaim::for_receipt(receipt, self.policy.duplicate_window) {
            Some(claim) => Ok(self.receipts.claim_fingerprint(&claim).await?),
            None => Ok(true),
        }
    }

    async fn transition(
        &self,
        receipt: &Receipt,
        to: ReceiptStatus,
        rejection_reason: Option<String>,
    ) -> Result<Receipt, SettlementError> {
        let processed_at = (to == ReceiptStatus::Rejected).then(|| self.clock.now());
        self.receipts
            .change_status(&StatusChange {
                receipt_id: receipt.id,
                from: receipt.status,
                to,
                rejection_reason,
                processed_at,
            })
            .await
            .map_err(|e| SettlementError::from_store(receipt.id, e))
    }

    async fn reject_duplicate(&self, receipt: &Receipt) -> Result<SettlementOutcome, SettlementError> {
        let reason = RejectionReason::Duplicate;
        self.transition(receipt, ReceiptStatus::Rejected, Some(reason.as_text()))
            .await?;

        self.metrics.record_receipt_rejected();
        tracing::warn!(
            receipt_id = %receipt.id,
            shopper_id = receipt.shopper_id,
            "Duplicate receipt rejected"
        );
        dispatch_quietly(
            self.notifier.as_ref(),
            LoyaltyEvent::ReceiptRejected {
                shopper_id: receipt.shopper_id,
                receipt_id: receipt.id,
                reason: reason.as_text(),
            },
        )
        .await;

        Ok(SettlementOutcome::Rejected {
            receipt_id: receipt.id,
            reason,
        })
    }

    async fn flag_receipt(&self, receipt: &Receipt) -> Result<SettlementOutcome, SettlementError> {
        self.transition(receipt, ReceiptStatus::Flagged, None).await?;

        self.metrics.record_receipt_flagged();
        tracing::info!(
            receipt_id = %receipt.id,
            quality_score = receipt.quality_score,
            "Receipt flagged for manual review"
        );
        dispatch_quietly(
            self.notifier.as_ref(),
            LoyaltyEvent::ReceiptFlagged {
                shopper_id: receipt.shopper_id,
                receipt_id: receipt.id,
            },
        )
        .await;

        Ok(SettlementOutcome::Flagged {
            receipt_id: receipt.id,
            quality_score: receipt.quality_score,
        })
    }

    async fn approve_receipt(
        &self,
        receipt: Receipt,
        items: &[LineItem],
        path: ApprovalPath,
    ) -> Result<SettlementOutcome, SettlementError> {
        if !self.claim(&receipt).await? {
            return self.reject_duplicate(&receipt).await;
        }

        let shopper = self
            .ledger
            .find_shopper(receipt.shopper_id)
            .await?
            .ok_or(SettlementError::ShopperNotFound(receipt.shopper_id))?;
        let tier_multiplier = shopper.tier_multiplier;

        let rules = self.brand_rules.snapshot().await?;
        let priced = PointsCalculator::calculate_receipt_points(items, &rules, tier_multiplier)?;
        let audit_sampled = sample_for_audit(self.policy.audit_sample_rate);

        let committed = self
            .receipts
            .commit_approval(&ApprovalCommit {
                receipt_id: receipt.id,
                expected_status: receipt.status,
                shopper_id: receipt.shopper_id,
                items: priced.priced_items,
                points: priced.total_points,
                tier_multiplier,
                flagged_for_audit: audit_sampled,
                processed_at: self.clock.now(),
            })
            .await;
        let record = match committed {
            Ok(record) => record,
            Err(err) => {
                // A reviewer rejected the receipt after it was loaded; the
                // claim above must not outlive the rejection.
                if let StoreError::InvalidTransition {
                    from: ReceiptStatus::Rejected,
                    ..
                } = err
                {
                    if let Err(e) = self.receipts.release_fingerprint(receipt.id).await {
                        tracing::warn!(receipt_id = %receipt.id, "Failed to release fingerprint: {}", e);
                    }
                }
                return Err(SettlementError::from_store(receipt.id, err));
            }
        };

        self.metrics.record_receipt_approved();
        let auto_approved = path == ApprovalPath::Automatic
            && receipt.quality_score >= self.policy.auto_approve_threshold;
        if audit_sampled {
            tracing::info!(receipt_id = %receipt.id, "Approved receipt sampled for audit");
        }
        tracing::info!(
            receipt_id = %receipt.id,
            shopper_id = receipt.shopper_id,
            points = priced.total_points,
            multiplier = %tier_multiplier,
            auto_approved,
            "Receipt approved"
        );

        Ok(SettlementOutcome::Approved(ApprovalSummary {
            receipt: record.receipt,
            points_awarded: priced.total_points,
            tier_multiplier,
            auto_approved,
            audit_sampled,
            credit: record.credit,
        }))
    }
}

fn validate_items(items: &[LineItem]) -> Result<(), SettlementError> {
    if items.is_empty() {
        return Err(SettlementError::Validation(
            "Receipt must contain at least one line item".to_string(),
        ));
    }
    for item in items {
        item.validate()?;
    }
    Ok(())
}

fn ensure_reviewable(receipt: &Receipt) -> Result<(), SettlementError> {
    match receipt.status {
        ReceiptStatus::Pending | ReceiptStatus::Flagged => Ok(()),
        status => Err(SettlementError::AlreadySettled {
            receipt_id: receipt.id,
            status,
        }),
    }
}

fn sample_for_audit(rate: f64) -> bool {
    if rate.is_nan() || rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    rand::thread_rng().gen_bool(rate)
}
