use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::availability::AvailabilityResolver;
use crate::fallback::FallbackChain;
use crate::ledger::{Ledger, LedgerError};
use crate::model::*;

/// Parse an ISO-8601 calendar date (`YYYY-MM-DD`).
pub fn parse_date(input: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| LedgerError::InvalidDate(input.to_string()))
}

/// The operations offered to transports. Holds no business rules of its own
/// beyond wiring: reads go through the fallback chain, writes to the ledger.
pub struct BookingService {
    ledger: Arc<Ledger>,
    fallback: FallbackChain,
}

impl BookingService {
    pub fn new(ledger: Arc<Ledger>, cache_ttl: Duration, store_timeout: Duration) -> Self {
        let slots = ledger.slot_generator().clone();
        let resolver = AvailabilityResolver::new(slots, ledger.clone());
        Self {
            ledger,
            fallback: FallbackChain::new(resolver, cache_ttl, store_timeout),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn fallback(&self) -> &FallbackChain {
        &self.fallback
    }

    /// Only malformed dates fail; store trouble degrades the answer instead.
    pub async fn get_availability(&self, date: &str) -> Result<AvailabilityView, LedgerError> {
        let date = parse_date(date)?;
        Ok(self.fallback.availability(date).await)
    }

    /// Reject slots the live view already shows as taken, then let the
    /// ledger enforce uniqueness atomically.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, LedgerError> {
        let view = self.fallback.resolver().resolve(draft.date).await?;
        if let Some(taken) = view
            .slots
            .iter()
            .find(|s| s.is_booked && s.slot.start == draft.start_time)
        {
            debug!("early conflict for {} {}", draft.date, taken.slot.start);
            let holder = self
                .ledger
                .find_active(draft.date)
                .await?
                .into_iter()
                .find(|b| b.start_time == draft.start_time)
                .map(|b| b.id);
            if let Some(holder) = holder {
                metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
                return Err(LedgerError::SlotConflict {
                    date: draft.date,
                    start: draft.start_time,
                    holder,
                });
            }
        }
        self.ledger.create(draft).await
    }

    pub async fn cancel_booking(&self, target: CancelTarget) -> Result<Booking, LedgerError> {
        self.ledger.cancel(target).await
    }

    pub async fn update_status(&self, id: Ulid, status: &str) -> Result<Booking, LedgerError> {
        self.ledger.update_status(id, status).await
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, LedgerError> {
        self.ledger.get(id).await
    }

    pub async fn list_bookings(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Booking>, LedgerError> {
        self.ledger.bookings_between(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotGenerator;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotledger_test_service");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn service(name: &str) -> BookingService {
        let ledger = Ledger::new(test_wal_path(name), Arc::new(SlotGenerator::default())).unwrap();
        BookingService::new(
            Arc::new(ledger),
            Duration::from_secs(60),
            Duration::from_secs(2),
        )
    }

    fn draft(date: &str, start: &str) -> BookingDraft {
        BookingDraft {
            client_name: "Maria".into(),
            client_phone: Some("555-0101".into()),
            date: parse_date(date).unwrap(),
            start_time: TimeOfDay::parse(start).unwrap(),
            vehicle_type: "hatchback".into(),
            vehicle_plate: Some("ABC-123".into()),
            service_type: "full detail".into(),
            extras: vec!["wax".into()],
            price_cents: 4500,
            status: None,
            notes: None,
        }
    }

    #[test]
    fn parse_date_accepts_iso_only() {
        assert_eq!(
            parse_date("2026-10-21").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 21).unwrap()
        );
        for bad in ["", "21/10/2026", "2026-13-01", "2026-02-30", "tomorrow"] {
            assert!(matches!(parse_date(bad), Err(LedgerError::InvalidDate(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn invalid_date_is_rejected_before_the_store() {
        let svc = service("svc_invalid_date.wal");
        svc.ledger().shutdown().await;
        assert!(matches!(
            svc.get_availability("not-a-date").await,
            Err(LedgerError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn wednesday_scenario_end_to_end() {
        let svc = service("svc_wednesday.wal");
        let view = svc.get_availability("2026-10-21").await.unwrap();
        assert_eq!(view.slots.len(), 5);
        assert!(view.slots.iter().all(|s| !s.is_booked));

        let booking = svc.create_booking(draft("2026-10-21", "08:30")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        let view = svc.get_availability("2026-10-21").await.unwrap();
        let booked: Vec<_> = view.slots.iter().filter(|s| s.is_booked).collect();
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].slot.start.to_string(), "08:30");
        assert_eq!(booked[0].slot.end.to_string(), "10:00");

        let again = svc.create_booking(draft("2026-10-21", "08:30")).await;
        assert!(matches!(again, Err(LedgerError::SlotConflict { holder, .. }) if holder == booking.id));

        svc.cancel_booking(CancelTarget::Id(booking.id)).await.unwrap();
        let view = svc.get_availability("2026-10-21").await.unwrap();
        assert!(view.slots.iter().all(|s| !s.is_booked));
        assert_eq!(view.provenance, Provenance::Primary);
    }

    #[tokio::test]
    async fn sunday_is_empty_and_primary() {
        let svc = service("svc_sunday.wal");
        let view = svc.get_availability("2026-10-25").await.unwrap();
        assert!(view.slots.is_empty());
        assert_eq!(view.provenance, Provenance::Primary);
        assert!(matches!(
            svc.create_booking(draft("2026-10-25", "08:30")).await,
            Err(LedgerError::ClosedDay(_))
        ));
    }

    #[tokio::test]
    async fn reads_degrade_but_writes_fail_when_store_is_down() {
        let svc = service("svc_store_down.wal");
        svc.create_booking(draft("2026-10-21", "10:00")).await.unwrap();
        let warm = svc.get_availability("2026-10-21").await.unwrap();
        assert_eq!(warm.provenance, Provenance::Primary);

        svc.ledger().shutdown().await;

        let cached = svc.get_availability("2026-10-21").await.unwrap();
        assert_eq!(cached.provenance, Provenance::DegradedCache);
        assert!(cached.stale);
        assert_eq!(cached.slots.iter().filter(|s| s.is_booked).count(), 1);

        let cold = svc.get_availability("2026-10-22").await.unwrap();
        assert_eq!(cold.provenance, Provenance::DegradedGenerated);
        assert!(cold.slots.iter().all(|s| !s.is_booked));

        let err = svc.create_booking(draft("2026-10-22", "08:30")).await.unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert!(err.is_retryable());

        let err = svc
            .cancel_booking(CancelTarget::ClientOnDate {
                client_name: "Maria".into(),
                date: parse_date("2026-10-21").unwrap(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }
}
