use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One clock-in/clock-out pair for a field agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ClockRecord {
    pub id: i64,
    pub agent_id: i64,
    /// Site-local date the shift belongs to
    pub shift_date: NaiveDate,
    pub clock_in_at: DateTime<Utc>,
    pub clock_out_at: Option<DateTime<Utc>>,
    pub is_late: bool,
}

impl ClockRecord {
    pub fn is_open(&self) -> bool {
        self.clock_out_at.is_none()
    }

    /// Worked time for closed records
    pub fn worked(&self) -> Option<chrono::Duration> {
        self.clock_out_at.map(|out| out - self.clock_in_at)
    }
}

/// Clock-in to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClockRecord {
    pub agent_id: i64,
    pub shift_date: NaiveDate,
    pub clock_in_at: DateTime<Utc>,
    pub is_late: bool,
}

/// Monthly attendance counters for one agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AttendanceSummary {
    pub total_days: i64,
    pub late_days: i64,
    pub missing_clockouts: i64,
}

impl AttendanceSummary {
    pub fn from_records(records: &[ClockRecord]) -> Self {
        let mut days: Vec<NaiveDate> = records.iter().map(|r| r.shift_date).collect();
        days.sort_unstable();
        days.dedup();

        Self {
            total_days: days.len() as i64,
            late_days: records.iter().filter(|r| r.is_late).count() as i64,
            missing_clockouts: records.iter().filter(|r| r.is_open()).count() as i64,
        }
    }
}
