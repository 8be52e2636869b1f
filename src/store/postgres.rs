// PostgreSQL store
//
// Guarded writes are single conditional UPDATEs whose RETURNING row tells us
// whether the guard held. Multi-row effects (approval, redemption) run in one
// transaction; any early return drops the transaction and rolls it back.
// Row locks are always taken receipt or reward first, shopper second.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::attendance::{AttendanceSummary, ClockRecord, NewClockRecord};
use crate::ledger::{CreditOutcome, EntryKind, LedgerEntry, LedgerPosting, Shopper};
use crate::receipts::{
    FingerprintClaim, Receipt, ReceiptLineItem, ReceiptStateMachine, ReceiptStatus,
};
use crate::rewards::{Redemption, RedemptionCommit, RedemptionStatus, Reward, RewardFilter};
use crate::rules::{BrandRule, TierClassifier};
use crate::store::{
    ApprovalCommit, ApprovalRecord, AttendanceStore, BrandRuleSource, LedgerStore, ReceiptStore,
    RewardStore, StatusChange, StoreError,
};

/// Store backed by the production database
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn append_entry(
    conn: &mut PgConnection,
    posting: &LedgerPosting,
    delta: i64,
    balance_after: i64,
) -> Result<(), StoreError> {
    if delta == 0 {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO points_ledger_entries (shopper_id, delta, kind, reference_id, balance_after, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(posting.shopper_id)
    .bind(delta)
    .bind(posting.kind)
    .bind(posting.reference_id)
    .bind(balance_after)
    .bind(posting.at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Credit inside an open transaction.
///
/// The first UPDATE locks the shopper row, so the classification below works
/// from the committed-plus-this-credit total and no concurrent credit can
/// interleave before commit.
async fn apply_credit(conn: &mut PgConnection, posting: &LedgerPosting) -> Result<CreditOutcome, StoreError> {
    let credited = sqlx::query_as::<_, Shopper>(
        r#"
        UPDATE shoppers
        SET points_balance = points_balance + $2,
            total_points_earned = total_points_earned + $2,
            updated_at = $3
        WHERE id = $1
        RETURNING id, user_id, points_balance, total_points_earned, loyalty_tier,
                  tier_multiplier, created_at, updated_at
        "#,
    )
    .bind(posting.shopper_id)
    .bind(posting.points)
    .bind(posting.at)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| StoreError::not_found("Shopper", posting.shopper_id))?;

    let previous_tier = credited.loyalty_tier;
    let promotion = TierClassifier::check_promotion(credited.total_points_earned, previous_tier);

    let shopper = if promotion.promoted {
        sqlx::query_as::<_, Shopper>(
            r#"
            UPDATE shoppers
            SET loyalty_tier = $2, tier_multiplier = $3
            WHERE id = $1
            RETURNING id, user_id, points_balance, total_points_earned, loyalty_tier,
                      tier_multiplier, created_at, updated_at
            "#,
        )
        .bind(posting.shopper_id)
        .bind(promotion.tier)
        .bind(promotion.multiplier)
        .fetch_one(&mut *conn)
        .await?
    } else {
        credited
    };

    append_entry(conn, posting, posting.points, shopper.points_balance).await?;

    Ok(CreditOutcome {
        shopper,
        previous_tier,
        promotion,
    })
}

/// Compare-and-swap debit inside an open transaction
async fn apply_debit(conn: &mut PgConnection, posting: &LedgerPosting) -> Result<Shopper, StoreError> {
    let debited = sqlx::query_as::<_, Shopper>(
        r#"
        UPDATE shoppers
        SET points_balance = points_balance - $2, updated_at = $3
        WHERE id = $1 AND points_balance >= $2
        RETURNING id, user_id, points_balance, total_points_earned, loyalty_tier,
                  tier_multiplier, created_at, updated_at
        "#,
    )
    .bind(posting.shopper_id)
    .bind(posting.points)
    .bind(posting.at)
    .fetch_optional(&mut *conn)
    .await?;

    let shopper = match debited {
        Some(shopper) => shopper,
        None => {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT points_balance FROM shoppers WHERE id = $1")
                    .bind(posting.shopper_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            return Err(match available {
                Some(available) => StoreError::InsufficientBalance {
                    requested: posting.points,
                    available,
                },
                None => StoreError::not_found("Shopper", posting.shopper_id),
            });
        }
    };

    append_entry(conn, posting, -posting.points, shopper.points_balance).await?;
    Ok(shopper)
}

/// Explain why a guarded receipt update matched no row
async fn receipt_guard_failure(
    conn: &mut PgConnection,
    receipt_id: Uuid,
    to: ReceiptStatus,
) -> Result<StoreError, StoreError> {
    let current: Option<ReceiptStatus> = sqlx::query_scalar("SELECT status FROM receipts WHERE id = $1")
        .bind(receipt_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(match current {
        Some(from) => StoreError::InvalidTransition { from, to },
        None => StoreError::not_found("Receipt", receipt_id),
    })
}

#[async_trait]
impl BrandRuleSource for PgStore {
    async fn load_brand_rules(&self) -> Result<Vec<BrandRule>, StoreError> {
        let rules = sqlx::query_as::<_, BrandRule>(
            r#"
            SELECT id AS brand_id, name, points_per_unit_currency, min_purchase_amount,
                   max_points_per_item, is_active
            FROM brands
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn create_shopper(&self, user_id: i64) -> Result<Shopper, StoreError> {
        let shopper = sqlx::query_as::<_, Shopper>(
            r#"
            INSERT INTO shoppers (user_id)
            VALUES ($1)
            RETURNING id, user_id, points_balance, total_points_earned, loyalty_tier,
                      tier_multiplier, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(shopper)
    }

    async fn find_shopper(&self, shopper_id: i64) -> Result<Option<Shopper>, StoreError> {
        let shopper = sqlx::query_as::<_, Shopper>(
            r#"
            SELECT id, user_id, points_balance, total_points_earned, loyalty_tier,
                   tier_multiplier, created_at, updated_at
            FROM shoppers
            WHERE id = $1
            "#,
        )
        .bind(shopper_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shopper)
    }

    async fn credit(&self, posting: &LedgerPosting) -> Result<CreditOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let outcome = apply_credit(&mut tx, posting).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn debit(&self, posting: &LedgerPosting) -> Result<Shopper, StoreError> {
        let mut tx = self.pool.begin().await?;
        let shopper = apply_debit(&mut tx, posting).await?;
        tx.commit().await?;
        Ok(shopper)
    }

    async fn entries(&self, shopper_id: i64, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, shopper_id, delta, kind, reference_id, balance_after, created_at
            FROM points_ledger_entries
            WHERE shopper_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(shopper_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn shoppers_with_balance(&self, after_id: i64, limit: i64) -> Result<Vec<Shopper>, StoreError> {
        let shoppers = sqlx::query_as::<_, Shopper>(
            r#"
            SELECT id, user_id, points_balance, total_points_earned, loyalty_tier,
                   tier_multiplier, created_at, updated_at
            FROM shoppers
            WHERE id > $1 AND points_balance > 0
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(shoppers)
    }
}

#[async_trait]
impl ReceiptStore for PgStore {
    async fn insert_receipt(&self, receipt: &Receipt) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO receipts (id, shopper_id, store_id, receipt_number, total_amount,
                                  capture_method, image_path, quality_score, status,
                                  flagged_for_audit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(receipt.id)
        .bind(receipt.shopper_id)
        .bind(receipt.store_id)
        .bind(&receipt.receipt_number)
        .bind(receipt.total_amount)
        .bind(receipt.capture_method)
        .bind(&receipt.image_path)
        .bind(receipt.quality_score)
        .bind(receipt.status)
        .bind(receipt.flagged_for_audit)
        .bind(receipt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_receipt(&self, receipt_id: Uuid) -> Result<Option<Receipt>, StoreError> {
        let receipt = sqlx::query_as::<_, Receipt>(
            r#"
            SELECT id, shopper_id, store_id, receipt_number, total_amount, capture_method,
                   image_path, quality_score, status, points_awarded, tier_multiplier_applied,
                   flagged_for_audit, rejection_reason, created_at, processed_at
            FROM receipts
            WHERE id = $1
            "#,
        )
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(receipt)
    }

    async fn receipts_by_status(
        &self,
        status: ReceiptStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Receipt>, StoreError> {
        let receipts = sqlx::query_as::<_, Receipt>(
            r#"
            SELECT id, shopper_id, store_id, receipt_number, total_amount, capture_method,
                   image_path, quality_score, status, points_awarded, tier_multiplier_applied,
                   flagged_for_audit, rejection_reason, created_at, processed_at
            FROM receipts
            WHERE status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(receipts)
    }

    async fn line_items(&self, receipt_id: Uuid) -> Result<Vec<ReceiptLineItem>, StoreError> {
        let items = sqlx::query_as::<_, ReceiptLineItem>(
            r#"
            SELECT id, receipt_id, brand_id, quantity, unit_price, line_total, points_calculated
            FROM receipt_line_items
            WHERE receipt_id = $1
            ORDER BY id
            "#,
        )
        .bind(receipt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn claim_fingerprint(&self, claim: &FingerprintClaim) -> Result<bool, StoreError> {
        // The conditional upsert is the duplicate check: it either inserts,
        // re-takes our own claim, takes over an expired one, or does nothing.
        let holder: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO receipt_fingerprints (fingerprint, receipt_id, submitted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (fingerprint) DO UPDATE
            SET receipt_id = EXCLUDED.receipt_id, submitted_at = EXCLUDED.submitted_at
            WHERE receipt_fingerprints.receipt_id = EXCLUDED.receipt_id
               OR receipt_fingerprints.submitted_at <= $4
            RETURNING receipt_id
            "#,
        )
        .bind(&claim.fingerprint)
        .bind(claim.receipt_id)
        .bind(claim.submitted_at)
        .bind(claim.expires_before())
        .fetch_optional(&self.pool)
        .await?;
        Ok(holder.is_some())
    }

    async fn release_fingerprint(&self, receipt_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM receipt_fingerprints WHERE receipt_id = $1")
            .bind(receipt_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn change_status(&self, change: &StatusChange) -> Result<Receipt, StoreError> {
        let mut conn = self.pool.acquire().await?;
        if change.to == ReceiptStatus::Approved
            || !ReceiptStateMachine::is_valid_transition(change.from, change.to)
        {
            return Err(receipt_guard_failure(&mut conn, change.receipt_id, change.to).await?);
        }

        let receipt = sqlx::query_as::<_, Receipt>(
            r#"
            UPDATE receipts
            SET status = $3, rejection_reason = $4, processed_at = COALESCE($5, processed_at)
            WHERE id = $1 AND status = $2
            RETURNING id, shopper_id, store_id, receipt_number, total_amount, capture_method,
                      image_path, quality_score, status, points_awarded, tier_multiplier_applied,
                      flagged_for_audit, rejection_reason, created_at, processed_at
            "#,
        )
        .bind(change.receipt_id)
        .bind(change.from)
        .bind(change.to)
        .bind(&change.rejection_reason)
        .bind(change.processed_at)
        .fetch_optional(&mut *conn)
        .await?;

        match receipt {
            Some(receipt) => Ok(receipt),
            None => Err(receipt_guard_failure(&mut conn, change.receipt_id, change.to).await?),
        }
    }

    async fn commit_approval(&self, commit: &ApprovalCommit) -> Result<ApprovalRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        if !ReceiptStateMachine::is_valid_transition(commit.expected_status, ReceiptStatus::Approved) {
            return Err(receipt_guard_failure(&mut tx, commit.receipt_id, ReceiptStatus::Approved).await?);
        }

        let receipt = sqlx::query_as::<_, Receipt>(
            r#"
            UPDATE receipts
            SET status = 'approved',
                points_awarded = $4,
                tier_multiplier_applied = $5,
                flagged_for_audit = $6,
                rejection_reason = NULL,
                processed_at = $7
            WHERE id = $1 AND status = $2 AND shopper_id = $3
            RETURNING id, shopper_id, store_id, receipt_number, total_amount, capture_method,
                      image_path, quality_score, status, points_awarded, tier_multiplier_applied,
                      flagged_for_audit, rejection_reason, created_at, processed_at
            "#,
        )
        .bind(commit.receipt_id)
        .bind(commit.expected_status)
        .bind(commit.shopper_id)
        .bind(commit.points)
        .bind(commit.tier_multiplier)
        .bind(commit.flagged_for_audit)
        .bind(commit.processed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let receipt = match receipt {
            Some(receipt) => receipt,
            None => {
                return Err(receipt_guard_failure(&mut tx, commit.receipt_id, ReceiptStatus::Approved).await?)
            }
        };

        for item in &commit.items {
            sqlx::query(
                r#"
                INSERT INTO receipt_line_items (receipt_id, brand_id, quantity, unit_price,
                                                line_total, points_calculated)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(commit.receipt_id)
            .bind(item.brand_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(item.points_calculated)
            .execute(&mut *tx)
            .await?;
        }

        let credit = apply_credit(
            &mut tx,
            &LedgerPosting {
                shopper_id: commit.shopper_id,
                points: commit.points,
                kind: EntryKind::ReceiptCredit,
                reference_id: Some(commit.receipt_id),
                at: commit.processed_at,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(ApprovalRecord { receipt, credit })
    }
}

#[async_trait]
impl RewardStore for PgStore {
    async fn find_reward(&self, reward_id: i64) -> Result<Option<Reward>, StoreError> {
        let reward = sqlx::query_as::<_, Reward>(
            r#"
            SELECT id, name, description, reward_type, points_cost, inventory_count, is_active
            FROM rewards
            WHERE id = $1
            "#,
        )
        .bind(reward_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reward)
    }

    async fn list_rewards(&self, filter: &RewardFilter) -> Result<Vec<Reward>, StoreError> {
        let rewards = sqlx::query_as::<_, Reward>(
            r#"
            SELECT id, name, description, reward_type, points_cost, inventory_count, is_active
            FROM rewards
            WHERE ($1::text IS NULL OR reward_type = $1)
              AND (NOT $2 OR is_active)
              AND ($3::bigint IS NULL OR points_cost <= $3)
            ORDER BY points_cost ASC, id ASC
            "#,
        )
        .bind(filter.reward_type)
        .bind(filter.active_only)
        .bind(filter.max_points)
        .fetch_all(&self.pool)
        .await?;
        Ok(rewards)
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<Redemption, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Reserve stock first; the guard is evaluated against the row as locked
        let cost: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE rewards
            SET inventory_count = inventory_count - 1
            WHERE id = $1 AND is_active AND inventory_count >= 1
            RETURNING points_cost
            "#,
        )
        .bind(commit.reward_id)
        .fetch_optional(&mut *tx)
        .await?;

        let cost = match cost {
            Some(cost) => cost,
            None => {
                let state: Option<(bool, i32)> =
                    sqlx::query_as("SELECT is_active, inventory_count FROM rewards WHERE id = $1")
                        .bind(commit.reward_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match state {
                    None => StoreError::not_found("Reward", commit.reward_id),
                    Some((false, _)) => StoreError::RewardInactive {
                        reward_id: commit.reward_id,
                    },
                    Some((true, _)) => StoreError::OutOfStock {
                        reward_id: commit.reward_id,
                    },
                });
            }
        };

        apply_debit(
            &mut tx,
            &LedgerPosting {
                shopper_id: commit.shopper_id,
                points: cost,
                kind: EntryKind::Redemption,
                reference_id: Some(commit.id),
                at: commit.redeemed_at,
            },
        )
        .await?;

        let redemption = sqlx::query_as::<_, Redemption>(
            r#"
            INSERT INTO redemptions (id, shopper_id, reward_id, points_used, status, code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, shopper_id, reward_id, points_used, status, code, created_at
            "#,
        )
        .bind(commit.id)
        .bind(commit.shopper_id)
        .bind(commit.reward_id)
        .bind(cost)
        .bind(RedemptionStatus::Completed)
        .bind(&commit.code)
        .bind(commit.redeemed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(redemption)
    }

    async fn redemptions_for(&self, shopper_id: i64) -> Result<Vec<Redemption>, StoreError> {
        let redemptions = sqlx::query_as::<_, Redemption>(
            r#"
            SELECT id, shopper_id, reward_id, points_used, status, code, created_at
            FROM redemptions
            WHERE shopper_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(shopper_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(redemptions)
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn open_shift(&self, record: &NewClockRecord) -> Result<ClockRecord, StoreError> {
        let inserted = sqlx::query_as::<_, ClockRecord>(
            r#"
            INSERT INTO clock_records (agent_id, shift_date, clock_in_at, is_late)
            VALUES ($1, $2, $3, $4)
            RETURNING id, agent_id, shift_date, clock_in_at, clock_out_at, is_late
            "#,
        )
        .bind(record.agent_id)
        .bind(record.shift_date)
        .bind(record.clock_in_at)
        .bind(record.is_late)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(err)
                if err
                    .as_database_error()
                    .map_or(false, |db_err| db_err.is_unique_violation()) =>
            {
                Err(StoreError::AlreadyClockedIn {
                    agent_id: record.agent_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn close_shift(
        &self,
        agent_id: i64,
        shift_date: NaiveDate,
        clock_out_at: DateTime<Utc>,
    ) -> Result<ClockRecord, StoreError> {
        let record = sqlx::query_as::<_, ClockRecord>(
            r#"
            UPDATE clock_records
            SET clock_out_at = $3
            WHERE agent_id = $1 AND shift_date = $2 AND clock_out_at IS NULL
            RETURNING id, agent_id, shift_date, clock_in_at, clock_out_at, is_late
            "#,
        )
        .bind(agent_id)
        .bind(shift_date)
        .bind(clock_out_at)
        .fetch_optional(&self.pool)
        .await?;

        record.ok_or(StoreError::NoActiveShift { agent_id })
    }

    async fn find_record(&self, agent_id: i64, shift_date: NaiveDate) -> Result<Option<ClockRecord>, StoreError> {
        let record = sqlx::query_as::<_, ClockRecord>(
            r#"
            SELECT id, agent_id, shift_date, clock_in_at, clock_out_at, is_late
            FROM clock_records
            WHERE agent_id = $1 AND shift_date = $2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .bind(shift_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn records(&self, agent_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, StoreError> {
        let records = sqlx::query_as::<_, ClockRecord>(
            r#"
            SELECT id, agent_id, shift_date, clock_in_at, clock_out_at, is_late
            FROM clock_records
            WHERE agent_id = $1 AND shift_date BETWEEN $2 AND $3
            ORDER BY shift_date DESC, id DESC
            "#,
        )
        .bind(agent_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn late_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, StoreError> {
        let records = sqlx::query_as::<_, ClockRecord>(
            r#"
            SELECT id, agent_id, shift_date, clock_in_at, clock_out_at, is_late
            FROM clock_records
            WHERE is_late AND shift_date BETWEEN $1 AND $2
            ORDER BY shift_date DESC, id DESC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn attendance_summary(
        &self,
        agent_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AttendanceSummary, StoreError> {
        let summary = sqlx::query_as::<_, AttendanceSummary>(
            r#"
            SELECT COUNT(DISTINCT shift_date) AS total_days,
                   COUNT(*) FILTER (WHERE is_late) AS late_days,
                   COUNT(*) FILTER (WHERE clock_out_at IS NULL) AS missing_clockouts
            FROM clock_records
            WHERE agent_id = $1 AND shift_date BETWEEN $2 AND $3
            "#,
        )
        .bind(agent_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(summary)
    }
}
