use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::TimeOfDay;

#[derive(Debug)]
pub enum LedgerError {
    InvalidDate(String),
    ClosedDay(NaiveDate),
    InvalidSlot {
        date: NaiveDate,
        start: TimeOfDay,
    },
    SlotConflict {
        date: NaiveDate,
        start: TimeOfDay,
        holder: Ulid,
    },
    Validation(&'static str),
    BookingNotFound(String),
    InvalidTransition(String),
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl LedgerError {
    /// True when the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::InvalidDate(input) => write!(f, "invalid date: {input:?} (expected YYYY-MM-DD)"),
            LedgerError::ClosedDay(date) => write!(f, "closed on {date} ({})", date.format("%A")),
            LedgerError::InvalidSlot { date, start } => {
                write!(f, "no slot starts at {start} on {date}")
            }
            LedgerError::SlotConflict { date, start, holder } => {
                write!(f, "slot {date} {start} already held by booking {holder}")
            }
            LedgerError::Validation(msg) => write!(f, "validation failed: {msg}"),
            LedgerError::BookingNotFound(what) => write!(f, "no active booking found: {what}"),
            LedgerError::InvalidTransition(msg) => write!(f, "invalid status transition: {msg}"),
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::StoreUnavailable(e) => write!(f, "booking store unavailable: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {}
