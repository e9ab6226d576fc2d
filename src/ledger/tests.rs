use super::*;
use super::conflict::{check_slot_free, validate_draft};
use crate::limits::*;

// ── Helpers ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotledger_test_ledger");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn ledger(name: &str) -> Ledger {
    Ledger::new(test_wal_path(name), Arc::new(SlotGenerator::default())).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// 2026-10-21 is a Wednesday.
fn wednesday() -> NaiveDate {
    date("2026-10-21")
}

fn draft(d: NaiveDate, hour: u16, minute: u16) -> BookingDraft {
    BookingDraft {
        client_name: "Joao Silva".into(),
        client_phone: Some("555-0199".into()),
        date: d,
        start_time: TimeOfDay::hm(hour, minute),
        vehicle_type: "sedan".into(),
        vehicle_plate: Some("XYZ-9876".into()),
        service_type: "basic wash".into(),
        extras: vec!["wax".into(), "  ".into()],
        price_cents: 3000,
        status: None,
        notes: Some("  ".into()),
    }
}

// ── Pure checks ──────────────────────────────────────────

#[test]
fn validate_rejects_missing_required_fields() {
    let mut d = draft(wednesday(), 8, 30);
    d.client_name = "   ".into();
    assert!(matches!(validate_draft(&d), Err(LedgerError::Validation(_))));

    let mut d = draft(wednesday(), 8, 30);
    d.vehicle_type = String::new();
    assert!(matches!(validate_draft(&d), Err(LedgerError::Validation(_))));

    let mut d = draft(wednesday(), 8, 30);
    d.service_type = String::new();
    assert!(matches!(validate_draft(&d), Err(LedgerError::Validation(_))));

    let mut d = draft(wednesday(), 8, 30);
    d.price_cents = -1;
    assert!(matches!(validate_draft(&d), Err(LedgerError::Validation(_))));

    assert!(validate_draft(&draft(wednesday(), 8, 30)).is_ok());
}

#[test]
fn validate_enforces_limits() {
    let mut d = draft(wednesday(), 8, 30);
    d.client_name = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(validate_draft(&d), Err(LedgerError::LimitExceeded(_))));

    let mut d = draft(wednesday(), 8, 30);
    d.extras = vec!["wax".into(); MAX_EXTRAS + 1];
    assert!(matches!(validate_draft(&d), Err(LedgerError::LimitExceeded(_))));

    let mut d = draft(wednesday(), 8, 30);
    d.notes = Some("n".repeat(MAX_NOTES_LEN + 1));
    assert!(matches!(validate_draft(&d), Err(LedgerError::LimitExceeded(_))));
}

#[test]
fn slot_check_reports_holder() {
    let mut day = DayState::new(wednesday());
    let start = TimeOfDay::hm(10, 0);
    assert!(check_slot_free(&day, start).is_ok());
    let id = Ulid::new();
    day.insert_booking(Booking {
        id,
        client_name: "A".into(),
        client_phone: None,
        date: wednesday(),
        start_time: start,
        vehicle_type: "van".into(),
        vehicle_plate: None,
        service_type: "wash".into(),
        extras: vec![],
        price_cents: 0,
        status: BookingStatus::Pending,
        notes: None,
        created_at: 0,
        updated_at: 0,
    });
    match check_slot_free(&day, start) {
        Err(LedgerError::SlotConflict { holder, .. }) => assert_eq!(holder, id),
        other => panic!("expected SlotConflict, got {other:?}"),
    }
}

// ── Ledger operations ────────────────────────────────────

#[tokio::test]
async fn create_normalizes_and_confirms() {
    let ledger = ledger("create_normalizes.wal");
    let mut d = draft(wednesday(), 8, 30);
    d.client_name = "  Joao Silva ".into();
    let b = ledger.create(d).await.unwrap();
    assert_eq!(b.client_name, "Joao Silva");
    assert_eq!(b.status, BookingStatus::Confirmed);
    assert_eq!(b.extras, vec!["wax".to_string()]);
    assert_eq!(b.notes, None);
    assert_eq!(b.created_at, b.updated_at);
    assert_eq!(ledger.get(b.id).await.unwrap(), b);
}

#[tokio::test]
async fn create_honours_initial_status_policy() {
    let ledger = ledger("initial_status.wal").with_initial_status(BookingStatus::Pending);
    let b = ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
    assert_eq!(b.status, BookingStatus::Pending);

    let mut d = draft(wednesday(), 10, 0);
    d.status = Some(BookingStatus::Confirmed);
    assert_eq!(ledger.create(d).await.unwrap().status, BookingStatus::Confirmed);

    let mut d = draft(wednesday(), 11, 30);
    d.status = Some(BookingStatus::Completed);
    assert!(matches!(ledger.create(d).await, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn create_rejects_closed_day_and_off_grid_start() {
    let ledger = ledger("closed_and_offgrid.wal");
    let sunday = date("2026-10-25");
    assert!(matches!(
        ledger.create(draft(sunday, 8, 30)).await,
        Err(LedgerError::ClosedDay(d)) if d == sunday
    ));
    assert!(matches!(
        ledger.create(draft(wednesday(), 9, 0)).await,
        Err(LedgerError::InvalidSlot { .. })
    ));
    assert!(matches!(
        ledger.create(draft(wednesday(), 13, 0)).await,
        Err(LedgerError::InvalidSlot { .. })
    ));
    // Saturday has no afternoon
    assert!(matches!(
        ledger.create(draft(date("2026-10-24"), 14, 0)).await,
        Err(LedgerError::InvalidSlot { .. })
    ));
    assert_eq!(ledger.booking_count(), 0);
}

#[tokio::test]
async fn second_create_conflicts_until_cancelled() {
    let ledger = ledger("conflict_until_cancel.wal");
    let first = ledger.create(draft(wednesday(), 14, 0)).await.unwrap();

    let second = ledger.create(draft(wednesday(), 14, 0)).await;
    assert!(matches!(second, Err(LedgerError::SlotConflict { holder, .. }) if holder == first.id));
    assert_eq!(ledger.find_active(wednesday()).await.unwrap().len(), 1);

    let cancelled = ledger.cancel(CancelTarget::Id(first.id)).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(ledger.find_active(wednesday()).await.unwrap().is_empty());

    let third = ledger.create(draft(wednesday(), 14, 0)).await.unwrap();
    assert_ne!(third.id, first.id);
    // History is retained
    assert_eq!(ledger.bookings_between(wednesday(), wednesday()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_creates_for_one_slot_yield_one_winner() {
    let ledger = Arc::new(ledger("concurrent_creates.wal"));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.create(draft(wednesday(), 8, 30)).await
        }));
    }
    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(LedgerError::SlotConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(ledger.find_active(wednesday()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_creates_for_different_slots_all_succeed() {
    let ledger = Arc::new(ledger("concurrent_distinct.wal"));
    let starts = [(8, 30), (10, 0), (11, 30), (14, 0), (15, 30)];
    let mut handles = Vec::new();
    for (h, m) in starts {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.create(draft(wednesday(), h, m)).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    let active = ledger.find_active(wednesday()).await.unwrap();
    assert_eq!(active.len(), 5);
    assert!(active.windows(2).all(|w| w[0].start_time < w[1].start_time));
}

#[tokio::test]
async fn cancel_by_client_and_date() {
    let ledger = ledger("cancel_by_name.wal");
    let b = ledger.create(draft(wednesday(), 15, 30)).await.unwrap();

    let wrong_day = ledger
        .cancel(CancelTarget::ClientOnDate {
            client_name: "Joao Silva".into(),
            date: date("2026-10-22"),
        })
        .await;
    assert!(matches!(wrong_day, Err(LedgerError::BookingNotFound(_))));

    let cancelled = ledger
        .cancel(CancelTarget::ClientOnDate {
            client_name: "  joao silva".into(),
            date: wednesday(),
        })
        .await
        .unwrap();
    assert_eq!(cancelled.id, b.id);

    let again = ledger
        .cancel(CancelTarget::ClientOnDate {
            client_name: "Joao Silva".into(),
            date: wednesday(),
        })
        .await;
    assert!(matches!(again, Err(LedgerError::BookingNotFound(_))));
}

#[tokio::test]
async fn cancel_unknown_or_cancelled_is_not_found() {
    let ledger = ledger("cancel_not_found.wal");
    assert!(matches!(
        ledger.cancel(CancelTarget::Id(Ulid::new())).await,
        Err(LedgerError::BookingNotFound(_))
    ));
    let b = ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
    ledger.cancel(CancelTarget::Id(b.id)).await.unwrap();
    assert!(matches!(
        ledger.cancel(CancelTarget::Id(b.id)).await,
        Err(LedgerError::BookingNotFound(_))
    ));
}

#[tokio::test]
async fn status_lifecycle() {
    let ledger = ledger("status_lifecycle.wal").with_initial_status(BookingStatus::Pending);
    let b = ledger.create(draft(wednesday(), 10, 0)).await.unwrap();

    assert!(matches!(
        ledger.update_status(b.id, "completed").await,
        Err(LedgerError::InvalidTransition(_))
    ));
    assert!(matches!(
        ledger.update_status(b.id, "finished").await,
        Err(LedgerError::InvalidTransition(_))
    ));

    let b = ledger.update_status(b.id, "confirmed").await.unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    let b = ledger.update_status(b.id, "in_progress").await.unwrap();
    assert_eq!(b.status, BookingStatus::InProgress);
    let b = ledger.update_status(b.id, "completed").await.unwrap();
    assert_eq!(b.status, BookingStatus::Completed);
    assert!(b.updated_at >= b.created_at);

    // Terminal: no further transitions, and still occupying its slot
    assert!(matches!(
        ledger.update_status(b.id, "cancelled").await,
        Err(LedgerError::BookingNotFound(_))
    ));
    assert!(matches!(
        ledger.update_status(b.id, "in_progress").await,
        Err(LedgerError::BookingNotFound(_))
    ));
    assert_eq!(ledger.find_active(wednesday()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_status_to_cancelled_releases_slot() {
    let ledger = ledger("status_cancel.wal");
    let b = ledger.create(draft(wednesday(), 11, 30)).await.unwrap();
    let b = ledger.update_status(b.id, "cancelled").await.unwrap();
    assert_eq!(b.status, BookingStatus::Cancelled);
    assert!(ledger.create(draft(wednesday(), 11, 30)).await.is_ok());
}

#[tokio::test]
async fn update_status_unknown_id() {
    let ledger = ledger("status_unknown.wal");
    assert!(matches!(
        ledger.update_status(Ulid::new(), "confirmed").await,
        Err(LedgerError::BookingNotFound(_))
    ));
}

#[tokio::test]
async fn bookings_between_orders_and_bounds() {
    let ledger = ledger("range_query.wal");
    let thu = date("2026-10-22");
    ledger.create(draft(thu, 14, 0)).await.unwrap();
    ledger.create(draft(wednesday(), 15, 30)).await.unwrap();
    ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
    ledger.create(draft(date("2026-10-27"), 8, 30)).await.unwrap();

    let found = ledger.bookings_between(wednesday(), thu).await.unwrap();
    let keys: Vec<_> = found
        .iter()
        .map(|b| format!("{} {}", b.date, b.start_time))
        .collect();
    assert_eq!(
        keys,
        vec!["2026-10-21 08:30", "2026-10-21 15:30", "2026-10-22 14:00"]
    );

    assert!(ledger.bookings_between(thu, wednesday()).await.unwrap().is_empty());
    assert!(matches!(
        ledger.bookings_between(wednesday(), date("2028-01-01")).await,
        Err(LedgerError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn wal_replay_restores_bookings_and_statuses() {
    let path = test_wal_path("replay.wal");
    let slots = Arc::new(SlotGenerator::default());
    let (kept, cancelled) = {
        let ledger = Ledger::new(path.clone(), slots.clone()).unwrap();
        let kept = ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
        let gone = ledger.create(draft(wednesday(), 10, 0)).await.unwrap();
        ledger.cancel(CancelTarget::Id(gone.id)).await.unwrap();
        ledger.update_status(kept.id, "in_progress").await.unwrap();
        (kept.id, gone.id)
    };

    let ledger = Ledger::new(path, slots).unwrap();
    assert_eq!(ledger.booking_count(), 2);
    assert_eq!(ledger.get(kept).await.unwrap().status, BookingStatus::InProgress);
    assert_eq!(ledger.get(cancelled).await.unwrap().status, BookingStatus::Cancelled);
    // Uniqueness survives a restart
    assert!(matches!(
        ledger.create(draft(wednesday(), 8, 30)).await,
        Err(LedgerError::SlotConflict { .. })
    ));
    assert!(ledger.create(draft(wednesday(), 10, 0)).await.is_ok());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let slots = Arc::new(SlotGenerator::default());
    let ids = {
        let ledger = Ledger::new(path.clone(), slots.clone()).unwrap();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let b = ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
            ledger.cancel(CancelTarget::Id(b.id)).await.unwrap();
            ids.push(b.id);
        }
        let live = ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
        ids.push(live.id);
        assert_eq!(ledger.wal_appends_since_compact().await, 11);

        let before = std::fs::metadata(&path).unwrap().len();
        ledger.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
        ids
    };

    let ledger = Ledger::new(path, slots).unwrap();
    assert_eq!(ledger.booking_count(), 6);
    let active = ledger.find_active(wednesday()).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(Some(&active[0].id), ids.last());
}

#[tokio::test]
async fn shutdown_makes_store_unavailable() {
    let ledger = ledger("shutdown.wal");
    let b = ledger.create(draft(wednesday(), 8, 30)).await.unwrap();
    ledger.shutdown().await;

    assert!(matches!(
        ledger.find_active(wednesday()).await,
        Err(LedgerError::StoreUnavailable(_))
    ));
    assert!(matches!(
        ledger.create(draft(wednesday(), 10, 0)).await,
        Err(LedgerError::StoreUnavailable(_))
    ));
    assert!(matches!(
        ledger.cancel(CancelTarget::Id(b.id)).await,
        Err(LedgerError::StoreUnavailable(_))
    ));
}
