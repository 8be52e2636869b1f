use crate::store::StoreError;

/// Error types for the attendance clock
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent {0} is already clocked in for today")]
    AlreadyClockedIn(i64),

    #[error("Agent {0} has no active clock-in for today")]
    NoActiveShift(i64),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AttendanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyClockedIn { agent_id } => AttendanceError::AlreadyClockedIn(agent_id),
            StoreError::NoActiveShift { agent_id } => AttendanceError::NoActiveShift(agent_id),
            other => AttendanceError::Store(other),
        }
    }
}
