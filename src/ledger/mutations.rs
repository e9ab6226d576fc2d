use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_slot_free, clean, clean_opt, initial_status, validate_draft};
use super::{Ledger, LedgerError, WalCommand};

impl Ledger {
    /// Create a booking. The slot check and the insert happen under the
    /// day's write lock, so concurrent creates for one slot yield exactly one
    /// success and `SlotConflict` for the rest.
    pub async fn create(&self, draft: BookingDraft) -> Result<Booking, LedgerError> {
        validate_draft(&draft)?;
        let status = initial_status(draft.status, self.initial_status)?;
        if self.slots.is_closed(draft.date) {
            return Err(LedgerError::ClosedDay(draft.date));
        }
        if self
            .slots
            .slot_starting_at(draft.date, draft.start_time)
            .is_none()
        {
            return Err(LedgerError::InvalidSlot {
                date: draft.date,
                start: draft.start_time,
            });
        }
        self.ensure_available()?;

        let (_gate, mut day) = self.lock_day_for_write(draft.date).await;
        if day.bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(LedgerError::LimitExceeded("too many bookings on date"));
        }
        if let Err(e) = check_slot_free(&day, draft.start_time) {
            debug!("create rejected: {e}");
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            client_name: clean(&draft.client_name),
            client_phone: clean_opt(draft.client_phone.as_deref()),
            date: draft.date,
            start_time: draft.start_time,
            vehicle_type: clean(&draft.vehicle_type),
            vehicle_plate: clean_opt(draft.vehicle_plate.as_deref()),
            service_type: clean(&draft.service_type),
            extras: draft
                .extras
                .iter()
                .filter_map(|e| clean_opt(Some(e)))
                .collect(),
            price_cents: draft.price_cents,
            status,
            notes: clean_opt(draft.notes.as_deref()),
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut day, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {} created for {} {} ({})",
            booking.id, booking.date, booking.start_time, booking.status
        );
        Ok(booking)
    }

    /// Cancel the matching active booking, releasing its slot.
    pub async fn cancel(&self, target: CancelTarget) -> Result<Booking, LedgerError> {
        let booking = match target {
            CancelTarget::Id(id) => {
                let date = self
                    .date_of(&id)
                    .ok_or_else(|| LedgerError::BookingNotFound(id.to_string()))?;
                self.transition(date, BookingStatus::Cancelled, |day| {
                    day.get(id).filter(|b| b.is_active()).map(|b| b.id)
                })
                .await
                .map_err(|e| not_found_as(e, || id.to_string()))?
            }
            CancelTarget::ClientOnDate { client_name, date } => {
                let wanted = client_name.trim().to_lowercase();
                let describe = || format!("{} on {date}", client_name.trim());
                if wanted.is_empty() {
                    return Err(LedgerError::Validation("client_name is required"));
                }
                self.transition(date, BookingStatus::Cancelled, |day| {
                    day.bookings
                        .iter()
                        .filter(|b| !b.status.is_terminal())
                        .find(|b| b.client_name.to_lowercase() == wanted)
                        .map(|b| b.id)
                })
                .await
                .map_err(|e| not_found_as(e, describe))?
            }
        };
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(
            "booking {} cancelled, slot {} {} released",
            booking.id, booking.date, booking.start_time
        );
        Ok(booking)
    }

    /// Move a booking along its lifecycle. `cancelled` is routed through
    /// [`Ledger::cancel`].
    pub async fn update_status(&self, id: Ulid, new_status: &str) -> Result<Booking, LedgerError> {
        let next = BookingStatus::parse(new_status)
            .ok_or_else(|| LedgerError::InvalidTransition(format!("unknown status {new_status:?}")))?;
        if next == BookingStatus::Cancelled {
            return self.cancel(CancelTarget::Id(id)).await;
        }
        let date = self
            .date_of(&id)
            .ok_or_else(|| LedgerError::BookingNotFound(id.to_string()))?;
        let booking = self
            .transition(date, next, |day| day.get(id).map(|b| b.id))
            .await
            .map_err(|e| not_found_as(e, || id.to_string()))?;
        info!("booking {} is now {}", booking.id, booking.status);
        Ok(booking)
    }

    /// Locate a booking on `date` under the write lock and move it to `next`.
    async fn transition<F>(
        &self,
        date: NaiveDate,
        next: BookingStatus,
        locate: F,
    ) -> Result<Booking, LedgerError>
    where
        F: FnOnce(&DayState) -> Option<Ulid>,
    {
        self.ensure_available()?;
        if self.get_day(&date).is_none() {
            return Err(LedgerError::BookingNotFound(String::new()));
        }
        let (_gate, mut day) = self.lock_day_for_write(date).await;
        let id = locate(&*day).ok_or_else(|| LedgerError::BookingNotFound(String::new()))?;
        let current = day
            .get(id)
            .map(|b| b.status)
            .ok_or_else(|| LedgerError::BookingNotFound(String::new()))?;
        if current.is_terminal() {
            return Err(LedgerError::BookingNotFound(String::new()));
        }
        if !current.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition(format!("{current} -> {next}")));
        }

        let event = Event::BookingStatusChanged {
            id,
            date,
            status: next,
            at: now_ms(),
        };
        self.persist_and_apply(&mut day, &event).await?;
        day.get(id)
            .cloned()
            .ok_or_else(|| LedgerError::BookingNotFound(id.to_string()))
    }

    /// Compact the WAL to one `BookingCreated` per record, carrying its
    /// current status. Blocks writers for the duration.
    pub async fn compact_wal(&self) -> Result<(), LedgerError> {
        let _gate = self.write_gate.write().await;

        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        let mut events = Vec::new();
        for date in dates {
            let Some(day) = self.get_day(&date) else { continue };
            let guard = day.read().await;
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| LedgerError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Fill in the description of an anonymous `BookingNotFound`.
fn not_found_as(e: LedgerError, describe: impl FnOnce() -> String) -> LedgerError {
    match e {
        LedgerError::BookingNotFound(what) if what.is_empty() => {
            LedgerError::BookingNotFound(describe())
        }
        other => other,
    }
}
