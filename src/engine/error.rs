use crate::model::{ScheduleDate, SlotStatus};

/// Every failure the scheduling core can surface. `Display` strings are the
/// user-visible reasons; the booking UI tells conflict classes apart by them.
#[derive(Debug)]
pub enum EngineError {
    /// Slot is already booked, never offered, or the date has no record.
    SlotUnavailable { date: ScheduleDate, time: String },
    /// This contact already holds a booking somewhere on this date.
    DuplicateBooking { date: ScheduleDate },
    /// Administrative operation addressed a date with no record.
    NotFound(ScheduleDate),
    /// Status operation addressed an open slot.
    NotBooked { date: ScheduleDate, time: String },
    InvalidTransition { from: SlotStatus, to: SlotStatus },
    /// Optimistic-concurrency check failed.
    VersionMismatch {
        date: ScheduleDate,
        expected: u64,
        actual: u64,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotUnavailable { date, time } => {
                write!(f, "slot already taken or not found: {date} {time}")
            }
            EngineError::DuplicateBooking { date } => {
                write!(f, "you already have an appointment booked for {date}")
            }
            EngineError::NotFound(date) => write!(f, "no schedule for date: {date}"),
            EngineError::NotBooked { date, time } => {
                write!(f, "no booking at {date} {time}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(
                    f,
                    "cannot move a booking from {} to {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            EngineError::VersionMismatch {
                date,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "stale schedule version for {date}: expected {expected}, found {actual}"
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
