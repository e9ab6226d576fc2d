use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::Booking;

use super::{Ledger, LedgerError};

/// Read access to booking occupancy, as needed by availability resolution.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Non-cancelled bookings on `date`, ordered by start time.
    async fn find_active(&self, date: NaiveDate) -> Result<Vec<Booking>, LedgerError>;
}

#[async_trait]
impl BookingStore for Ledger {
    async fn find_active(&self, date: NaiveDate) -> Result<Vec<Booking>, LedgerError> {
        Ledger::find_active(self, date).await
    }
}
