use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::attendance::{AttendanceError, AttendanceSummary, ClockRecord, NewClockRecord};
use crate::clock::Clock;
use crate::config::ShiftPolicy;
use crate::metrics::{EngineMetrics, Operation};
use crate::store::AttendanceStore;

/// Where an agent stands in today's shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShiftStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::NotStarted => "not-started",
            ShiftStatus::InProgress => "in-progress",
            ShiftStatus::Completed => "completed",
        }
    }
}

/// Payment owed to an agent for one day
///
/// `active_items × receipts_processed / target × daily_wage`, rounded to
/// cents. A zero target pays nothing.
pub fn calculate_ppg_payment(
    active_items: i64,
    receipts_processed: i64,
    target: i64,
    daily_wage: Decimal,
) -> Result<Decimal, AttendanceError> {
    if active_items < 0 || receipts_processed < 0 || target < 0 {
        return Err(AttendanceError::Validation(
            "Payment inputs must not be negative".to_string(),
        ));
    }
    if daily_wage.is_sign_negative() && !daily_wage.is_zero() {
        return Err(AttendanceError::Validation(format!(
            "Daily wage must not be negative, got {}",
            daily_wage
        )));
    }
    if target == 0 {
        return Ok(Decimal::ZERO);
    }

    let overflow = || AttendanceError::Validation("Payment overflow".to_string());
    let payment = Decimal::from(active_items)
        .checked_mul(Decimal::from(receipts_processed))
        .and_then(|v| v.checked_div(Decimal::from(target)))
        .and_then(|v| v.checked_mul(daily_wage))
        .ok_or_else(overflow)?;
    Ok(payment.round_dp(2))
}

/// Service for agent clock-in/clock-out
#[derive(Clone)]
pub struct AttendanceClock {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    policy: ShiftPolicy,
    metrics: EngineMetrics,
}

impl AttendanceClock {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        policy: ShiftPolicy,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            metrics,
        }
    }

    /// Site-local date of an instant
    pub fn shift_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.policy.site_offset).date_naive()
    }

    /// Late when more than the grace period after shift start, site time
    pub fn is_late(&self, at: DateTime<Utc>) -> bool {
        let local: DateTime<FixedOffset> = at.with_timezone(&self.policy.site_offset);
        let cutoff = local.date_naive().and_time(self.policy.start) + self.policy.grace;
        local.naive_local() > cutoff
    }

    /// Open today's shift for an agent
    pub async fn clock_in(&self, agent_id: i64) -> Result<ClockRecord, AttendanceError> {
        let _timer = self.metrics.start(Operation::Attendance);
        let now = self.clock.now();

        let record = self
            .store
            .open_shift(&NewClockRecord {
                agent_id,
                shift_date: self.shift_date(now),
                clock_in_at: now,
                is_late: self.is_late(now),
            })
            .await?;

        if record.is_late {
            tracing::warn!(agent_id, shift_date = %record.shift_date, "Agent clocked in late");
        } else {
            tracing::info!(agent_id, shift_date = %record.shift_date, "Agent clocked in");
        }
        Ok(record)
    }

    /// Close today's open shift
    pub async fn clock_out(&self, agent_id: i64) -> Result<ClockRecord, AttendanceError> {
        let _timer = self.metrics.start(Operation::Attendance);
        let now = self.clock.now();

        let record = self
            .store
            .close_shift(agent_id, self.shift_date(now), now)
            .await?;

        let worked_minutes = record.worked().map(|d| d.num_minutes()).unwrap_or_default();
        tracing::info!(agent_id, worked_minutes, "Agent clocked out");
        if worked_minutes < self.policy.duration.num_minutes() {
            tracing::debug!(agent_id, worked_minutes, "Shift shorter than scheduled");
        }
        Ok(record)
    }

    pub async fn today_record(&self, agent_id: i64) -> Result<Option<ClockRecord>, AttendanceError> {
        let today = self.shift_date(self.clock.now());
        Ok(self.store.find_record(agent_id, today).await?)
    }

    pub async fn today_status(&self, agent_id: i64) -> Result<ShiftStatus, AttendanceError> {
        Ok(match self.today_record(agent_id).await? {
            None => ShiftStatus::NotStarted,
            Some(record) if record.is_open() => ShiftStatus::InProgress,
            Some(_) => ShiftStatus::Completed,
        })
    }

    /// Agent's records between two dates inclusive, newest first
    pub async fn records(
        &self,
        agent_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ClockRecord>, AttendanceError> {
        ensure_ordered(from, to)?;
        Ok(self.store.records(agent_id, from, to).await?)
    }

    /// Late clock-ins of all agents between two dates inclusive
    pub async fn late_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClockRecord>, AttendanceError> {
        ensure_ordered(from, to)?;
        Ok(self.store.late_records(from, to).await?)
    }

    /// Attendance counters for one calendar month
    pub async fn monthly_report(
        &self,
        agent_id: i64,
        year: i32,
        month: u32,
    ) -> Result<AttendanceSummary, AttendanceError> {
        let invalid = || AttendanceError::Validation(format!("Invalid month {}-{}", year, month));
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(invalid)?;
        let last = next_month.pred_opt().ok_or_else(invalid)?;

        Ok(self.store.attendance_summary(agent_id, first, last).await?)
    }
}

fn ensure_ordered(from: NaiveDate, to: NaiveDate) -> Result<(), AttendanceError> {
    if from > to {
        return Err(AttendanceError::Validation(format!(
            "Start date {} is after end date {}",
            from, to
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn attendance(at: DateTime<Utc>) -> (AttendanceClock, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(at));
        let service = AttendanceClock::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            ShiftPolicy::default(),
            EngineMetrics::new(),
        );
        (service, clock)
    }

    /// Site time is UTC+3, so 05:00 UTC is 08:00 local
    fn utc(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_lateness_uses_site_time_and_grace() {
        let (service, _) = attendance(utc(5, 0));
        assert!(!service.is_late(utc(5, 0)));
        assert!(!service.is_late(utc(5, 15)));
        assert!(service.is_late(utc(5, 16)));
        assert!(!service.is_late(utc(4, 30)));
    }

    #[test]
    fn test_shift_date_rolls_over_at_site_midnight() {
        let (service, _) = attendance(utc(5, 0));
        let late_evening_utc = Utc.with_ymd_and_hms(2024, 3, 4, 22, 0, 0).unwrap();
        assert_eq!(
            service.shift_date(late_evening_utc),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[tokio::test]
    async fn test_clock_in_then_out() {
        let (service, clock) = attendance(utc(5, 20));
        assert_eq!(service.today_status(9).await.unwrap(), ShiftStatus::NotStarted);

        let record = service.clock_in(9).await.unwrap();
        assert!(record.is_late);
        assert_eq!(service.today_status(9).await.unwrap(), ShiftStatus::InProgress);
        assert!(matches!(
            service.clock_in(9).await,
            Err(AttendanceError::AlreadyClockedIn(9))
        ));

        clock.advance(chrono::Duration::hours(8));
        let closed = service.clock_out(9).await.unwrap();
        assert_eq!(closed.worked(), Some(chrono::Duration::hours(8)));
        assert_eq!(service.today_status(9).await.unwrap(), ShiftStatus::Completed);
        assert!(matches!(
            service.clock_out(9).await,
            Err(AttendanceError::NoActiveShift(9))
        ));
    }

    #[tokio::test]
    async fn test_late_records_and_monthly_report() {
        let (service, clock) = attendance(utc(5, 30));
        service.clock_in(1).await.unwrap();
        clock.set(utc(4, 55));
        service.clock_in(2).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let late = service.late_records(day, day).await.unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].agent_id, 1);

        let report = service.monthly_report(1, 2024, 3).await.unwrap();
        assert_eq!(
            report,
            AttendanceSummary {
                total_days: 1,
                late_days: 1,
                missing_clockouts: 1
            }
        );
        assert!(service.monthly_report(1, 2024, 13).await.is_err());
        assert!(service.records(1, day, day.pred_opt().unwrap()).await.is_err());
    }

    #[test]
    fn test_ppg_payment() {
        assert_eq!(calculate_ppg_payment(3, 40, 60, dec!(900)).unwrap(), dec!(1800.00));
        assert_eq!(calculate_ppg_payment(3, 40, 0, dec!(900)).unwrap(), Decimal::ZERO);
        assert_eq!(calculate_ppg_payment(1, 1, 3, dec!(100)).unwrap(), dec!(33.33));
        assert!(calculate_ppg_payment(-1, 40, 60, dec!(900)).is_err());
        assert!(calculate_ppg_payment(1, 40, 60, dec!(-1)).is_err());
    }
}
