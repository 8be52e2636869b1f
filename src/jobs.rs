// Periodic jobs
//
// Run by the binary on a fixed interval when ENABLE_JOBS is set. Each run is
// idempotent with respect to ledger state; jobs only read and notify.

use chrono::{DateTime, Datelike, FixedOffset, Months, TimeZone, Utc};
use std::sync::Arc;

use crate::attendance::{AttendanceClock, AttendanceError, ClockRecord};
use crate::clock::Clock;
use crate::notifications::{dispatch_quietly, LoyaltyEvent, NotificationDispatcher};
use crate::store::{LedgerStore, StoreError};

/// Shoppers fetched per page while sending warnings
pub const WARNING_BATCH_SIZE: i64 = 500;

/// Months before expiry in which warnings go out
pub const WARNING_WINDOW_MONTHS: u32 = 2;

/// Next points expiry at or after `now`: 31 October, 23:59:59 site time
pub fn points_expiry_after(now: DateTime<Utc>, site_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&site_offset);
    let expiry_in = |year: i32| site_offset.with_ymd_and_hms(year, 10, 31, 23, 59, 59).single();

    let this_year = expiry_in(local.year())?;
    let expiry = if local <= this_year {
        this_year
    } else {
        expiry_in(local.year() + 1)?
    };
    Some(expiry.with_timezone(&Utc))
}

/// Whether `now` falls inside the warning window before `expiry`
pub fn in_warning_window(now: DateTime<Utc>, expiry: DateTime<Utc>) -> bool {
    match expiry.checked_sub_months(Months::new(WARNING_WINDOW_MONTHS)) {
        Some(opens) => now >= opens && now <= expiry,
        None => false,
    }
}

/// Outcome of one expiration warning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationRun {
    pub expires_at: Option<DateTime<Utc>>,
    pub shoppers_warned: usize,
}

/// Warns every shopper holding points ahead of the yearly expiry
pub struct ExpirationWarningJob {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    site_offset: FixedOffset,
    batch_size: i64,
}

impl ExpirationWarningJob {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        site_offset: FixedOffset,
    ) -> Self {
        Self {
            ledger,
            notifier,
            clock,
            site_offset,
            batch_size: WARNING_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn run(&self) -> Result<ExpirationRun, StoreError> {
        let now = self.clock.now();
        let Some(expires_at) = points_expiry_after(now, self.site_offset) else {
            tracing::warn!("Could not compute the next points expiry");
            return Ok(ExpirationRun {
                expires_at: None,
                shoppers_warned: 0,
            });
        };

        if !in_warning_window(now, expires_at) {
            tracing::debug!(%expires_at, "Outside the points expiry warning window");
            return Ok(ExpirationRun {
                expires_at: Some(expires_at),
                shoppers_warned: 0,
            });
        }

        let mut warned = 0;
        let mut after_id = 0;
        loop {
            let page = self.ledger.shoppers_with_balance(after_id, self.batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            let full_page = page.len() as i64 == self.batch_size;

            for shopper in page {
                dispatch_quietly(
                    self.notifier.as_ref(),
                    LoyaltyEvent::PointsExpiring {
                        shopper_id: shopper.id,
                        points: shopper.points_balance,
                        expires_at,
                    },
                )
                .await;
                warned += 1;
            }

            if !full_page {
                break;
            }
        }

        tracing::info!(shoppers = warned, %expires_at, "Points expiration warnings sent");
        Ok(ExpirationRun {
            expires_at: Some(expires_at),
            shoppers_warned: warned,
        })
    }
}

/// Lists today's late clock-ins for supervisors
pub struct LateClockInReport {
    attendance: AttendanceClock,
    clock: Arc<dyn Clock>,
}

impl LateClockInReport {
    pub fn new(attendance: AttendanceClock, clock: Arc<dyn Clock>) -> Self {
        Self { attendance, clock }
    }

    pub async fn run(&self) -> Result<Vec<ClockRecord>, AttendanceError> {
        let today = self.attendance.shift_date(self.clock.now());
        let late = self.attendance.late_records(today, today).await?;
        for record in &late {
            tracing::warn!(
                agent_id = record.agent_id,
                clock_in_at = %record.clock_in_at,
                "Late clock-in recorded"
            );
        }
        tracing::info!(late = late.len(), shift_date = %today, "Late clock-in check completed");
        Ok(late)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ShiftPolicy;
    use crate::ledger::{EntryKind, LedgerPosting};
    use crate::metrics::EngineMetrics;
    use crate::notifications::RecordingDispatcher;
    use crate::store::MemoryStore;

    fn nairobi() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    #[test]
    fn test_expiry_is_end_of_october_site_time() {
        let now = Utc.with_ymd_and_hms(2024, 9, 15, 12, 0, 0).unwrap();
        let expiry = points_expiry_after(now, nairobi()).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2024, 10, 31, 20, 59, 59).unwrap());
    }

    #[test]
    fn test_expiry_rolls_to_next_year_after_deadline() {
        let now = Utc.with_ymd_and_hms(2024, 10, 31, 21, 0, 0).unwrap();
        let expiry = points_expiry_after(now, nairobi()).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2025, 10, 31, 20, 59, 59).unwrap());
    }

    #[test]
    fn test_warning_window_is_two_months() {
        let expiry = Utc.with_ymd_and_hms(2024, 10, 31, 20, 59, 59).unwrap();
        assert!(in_warning_window(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(), expiry));
        assert!(in_warning_window(expiry, expiry));
        assert!(!in_warning_window(Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap(), expiry));
    }

    async fn store_with_balances(balances: &[i64]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (i, balance) in balances.iter().enumerate() {
            let shopper = store.create_shopper(i as i64 + 1).await.unwrap();
            store
                .credit(&LedgerPosting {
                    shopper_id: shopper.id,
                    points: *balance,
                    kind: EntryKind::ManualCredit,
                    reference_id: None,
                    at: Utc::now(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_warnings_page_through_all_holders() {
        let store = store_with_balances(&[100, 0, 250, 40, 0, 75]).await;
        let notifier = Arc::new(RecordingDispatcher::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 10, 1, 6, 0, 0).unwrap()));
        let job = ExpirationWarningJob::new(store, notifier.clone(), clock, nairobi()).with_batch_size(2);

        let run = job.run().await.unwrap();
        assert_eq!(run.shoppers_warned, 4);

        let points: Vec<i64> = notifier
            .events()
            .iter()
            .filter_map(|event| match event {
                LoyaltyEvent::PointsExpiring { points, .. } => Some(*points),
                _ => None,
            })
            .collect();
        assert_eq!(points, vec![100, 250, 40, 75]);
    }

    #[tokio::test]
    async fn test_no_warnings_outside_window() {
        let store = store_with_balances(&[100]).await;
        let notifier = Arc::new(RecordingDispatcher::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()));
        let job = ExpirationWarningJob::new(store, notifier.clone(), clock, nairobi());

        let run = job.run().await.unwrap();
        assert_eq!(run.shoppers_warned, 0);
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_late_report_lists_todays_late_agents() {
        let store = Arc::new(MemoryStore::new());
        // 08:40 site time
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 5, 40, 0).unwrap()));
        let attendance = AttendanceClock::new(
            store,
            clock.clone(),
            ShiftPolicy::default(),
            EngineMetrics::new(),
        );
        attendance.clock_in(11).await.unwrap();

        let report = LateClockInReport::new(attendance, clock);
        let late = report.run().await.unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].agent_id, 11);
    }
}
