use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::ledger::{BookingStore, LedgerError};
use crate::model::*;
use crate::slots::SlotGenerator;

/// Mark each candidate slot booked when an active booking starts at the same
/// time. Bookings always cover whole slots, so start-time equality is the
/// occupancy rule (no range overlap).
pub fn mark_occupied(slots: Vec<TimeSlot>, active: &[Booking]) -> Vec<SlotAvailability> {
    let occupied: HashSet<TimeOfDay> = active.iter().map(|b| b.start_time).collect();
    slots
        .into_iter()
        .map(|slot| SlotAvailability {
            is_booked: occupied.contains(&slot.start),
            slot,
        })
        .collect()
}

/// Candidate slots minus occupied ones, against the live store.
#[derive(Clone)]
pub struct AvailabilityResolver {
    slots: Arc<SlotGenerator>,
    store: Arc<dyn BookingStore>,
}

impl AvailabilityResolver {
    pub fn new(slots: Arc<SlotGenerator>, store: Arc<dyn BookingStore>) -> Self {
        Self { slots, store }
    }

    pub fn slot_generator(&self) -> &SlotGenerator {
        &self.slots
    }

    /// Closed days answer immediately without touching the store.
    pub async fn resolve(&self, date: NaiveDate) -> Result<AvailabilityView, LedgerError> {
        let slots = self.slots.generate(date);
        if slots.is_empty() {
            return Ok(view(date, Vec::new()));
        }
        let active = self.store.find_active(date).await?;
        Ok(view(date, mark_occupied(slots, &active)))
    }
}

fn view(date: NaiveDate, slots: Vec<SlotAvailability>) -> AvailabilityView {
    AvailabilityView {
        date,
        slots,
        provenance: Provenance::Primary,
        stale: false,
        computed_at: now_ms(),
    }
}
