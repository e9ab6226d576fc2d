use crate::limits::*;
use crate::model::*;

use super::LedgerError;

/// Field checks applied once, at the ledger boundary.
pub(crate) fn validate_draft(draft: &BookingDraft) -> Result<(), LedgerError> {
    if draft.client_name.trim().is_empty() {
        return Err(LedgerError::Validation("client_name is required"));
    }
    if draft.vehicle_type.trim().is_empty() {
        return Err(LedgerError::Validation("vehicle_type is required"));
    }
    if draft.service_type.trim().is_empty() {
        return Err(LedgerError::Validation("service_type is required"));
    }
    if draft.price_cents < 0 {
        return Err(LedgerError::Validation("price must not be negative"));
    }
    let short_fields = [
        Some(draft.client_name.as_str()),
        Some(draft.vehicle_type.as_str()),
        Some(draft.service_type.as_str()),
        draft.client_phone.as_deref(),
        draft.vehicle_plate.as_deref(),
    ];
    if short_fields.iter().flatten().any(|f| f.len() > MAX_NAME_LEN) {
        return Err(LedgerError::LimitExceeded("field too long"));
    }
    if draft.extras.len() > MAX_EXTRAS {
        return Err(LedgerError::LimitExceeded("too many extras"));
    }
    if draft.extras.iter().any(|e| e.len() > MAX_NAME_LEN) {
        return Err(LedgerError::LimitExceeded("extra name too long"));
    }
    if draft.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(LedgerError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// New bookings may only start out pending or confirmed.
pub(crate) fn initial_status(
    requested: Option<BookingStatus>,
    default: BookingStatus,
) -> Result<BookingStatus, LedgerError> {
    match requested.unwrap_or(default) {
        s @ (BookingStatus::Pending | BookingStatus::Confirmed) => Ok(s),
        _ => Err(LedgerError::Validation(
            "initial status must be pending or confirmed",
        )),
    }
}

/// Caller must hold the day's write lock across this check and the insert.
pub(crate) fn check_slot_free(day: &DayState, start: TimeOfDay) -> Result<(), LedgerError> {
    match day.active_at(start) {
        Some(holder) => Err(LedgerError::SlotConflict {
            date: day.date,
            start,
            holder: holder.id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn clean(s: &str) -> String {
    s.trim().to_string()
}

pub(crate) fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
