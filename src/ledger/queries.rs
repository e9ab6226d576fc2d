use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Ledger, LedgerError};

impl Ledger {
    /// Non-cancelled bookings on `date`, ordered by start time.
    pub async fn find_active(&self, date: NaiveDate) -> Result<Vec<Booking>, LedgerError> {
        self.ensure_available()?;
        let day = match self.get_day(&date) {
            Some(day) => day,
            None => return Ok(vec![]),
        };
        let guard = day.read().await;
        Ok(guard.active().cloned().collect())
    }

    pub async fn get(&self, id: Ulid) -> Result<Booking, LedgerError> {
        self.ensure_available()?;
        let not_found = || LedgerError::BookingNotFound(id.to_string());
        let date = self.date_of(&id).ok_or_else(not_found)?;
        let day = self.get_day(&date).ok_or_else(not_found)?;
        let guard = day.read().await;
        guard.get(id).cloned().ok_or_else(not_found)
    }

    /// Every record dated within `[from, to]`, cancelled ones included,
    /// ordered by date then start time.
    pub async fn bookings_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Booking>, LedgerError> {
        self.ensure_available()?;
        if to < from {
            return Ok(vec![]);
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(LedgerError::LimitExceeded("date range too wide"));
        }

        let mut dates: Vec<NaiveDate> = self
            .days
            .iter()
            .map(|e| *e.key())
            .filter(|d| (from..=to).contains(d))
            .collect();
        dates.sort();

        let mut out = Vec::new();
        for date in dates {
            if let Some(day) = self.get_day(&date) {
                let guard = day.read().await;
                out.extend(guard.bookings.iter().cloned());
            }
        }
        Ok(out)
    }

    pub fn booking_count(&self) -> usize {
        self.booking_dates.len()
    }
}
