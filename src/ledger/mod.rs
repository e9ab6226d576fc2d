mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::LedgerError;
pub use store::BookingStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::slots::SlotGenerator;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut pending = Some(cmd);
        while let Some(cmd) = pending.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    let mut batch = vec![(event, response)];
                    loop {
                        match rx.try_recv() {
                            Ok(WalCommand::Append { event, response }) => {
                                batch.push((event, response));
                            }
                            Ok(other) => {
                                pending = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    if let Err(e) = &result {
                        warn!("WAL flush failed for {} events: {e}", batch.len());
                    }
                    respond_batch(batch, &result);
                }
                WalCommand::Compact { events, response } => {
                    let result = Wal::write_compact_file(wal.path(), &events)
                        .and_then(|()| wal.swap_compact_file());
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(wal.appends_since_compact());
                }
                WalCommand::Shutdown { response } => {
                    rx.close();
                    let _ = response.send(());
                    info!("WAL writer stopped");
                    return;
                }
            }
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// The authoritative booking store: per-date state in memory, every change
/// recorded in the WAL before it is applied.
pub struct Ledger {
    days: DashMap<NaiveDate, SharedDayState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → date.
    booking_dates: DashMap<Ulid, NaiveDate>,
    /// Writers hold this shared, compaction holds it exclusively. Always
    /// taken before any day lock.
    write_gate: RwLock<()>,
    slots: Arc<SlotGenerator>,
    initial_status: BookingStatus,
}

/// Apply an event to a day (no locking; caller holds the lock).
fn apply_to_day(day: &mut DayState, event: &Event, index: &DashMap<Ulid, NaiveDate>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.date);
            day.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            if let Some(b) = day.get_mut(*id) {
                b.status = *status;
                b.updated_at = *at;
            }
        }
    }
}

fn event_date(event: &Event) -> NaiveDate {
    match event {
        Event::BookingCreated { booking } => booking.date,
        Event::BookingStatusChanged { date, .. } => *date,
    }
}

impl Ledger {
    pub fn new(wal_path: PathBuf, slots: Arc<SlotGenerator>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let ledger = Self {
            days: DashMap::new(),
            wal_tx,
            booking_dates: DashMap::new(),
            write_gate: RwLock::new(()),
            slots,
            initial_status: BookingStatus::Confirmed,
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // Never blocking_write here: this may run inside an async context.
        for event in &events {
            let day = ledger.day_entry(event_date(event));
            let Ok(mut guard) = day.try_write() else {
                return Err(io::Error::other("replay: day state unexpectedly locked"));
            };
            apply_to_day(&mut guard, event, &ledger.booking_dates);
        }
        if !events.is_empty() {
            info!(
                "replayed {} WAL events ({} bookings)",
                events.len(),
                ledger.booking_dates.len()
            );
        }

        Ok(ledger)
    }

    /// Status given to new bookings that don't request one.
    pub fn with_initial_status(mut self, status: BookingStatus) -> Self {
        self.initial_status = status;
        self
    }

    pub fn slot_generator(&self) -> &Arc<SlotGenerator> {
        &self.slots
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| LedgerError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))
    }

    /// Fails once the WAL writer has stopped.
    fn ensure_available(&self) -> Result<(), LedgerError> {
        if self.wal_tx.is_closed() {
            return Err(LedgerError::StoreUnavailable("WAL writer shut down".into()));
        }
        Ok(())
    }

    /// Stop the WAL writer. Every later read or write reports `StoreUnavailable`.
    pub async fn shutdown(&self) {
        let _gate = self.write_gate.write().await;
        let (tx, rx) = oneshot::channel();
        if self.wal_tx.send(WalCommand::Shutdown { response: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub(super) fn get_day(&self, date: &NaiveDate) -> Option<SharedDayState> {
        self.days.get(date).map(|e| e.value().clone())
    }

    fn day_entry(&self, date: NaiveDate) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    /// Acquire the write gate, then the day's write lock. The day lock is what
    /// serializes all writers touching slots on `date`.
    pub(super) async fn lock_day_for_write(
        &self,
        date: NaiveDate,
    ) -> (RwLockReadGuard<'_, ()>, OwnedRwLockWriteGuard<DayState>) {
        let gate = self.write_gate.read().await;
        let day = self.day_entry(date).write_owned().await;
        (gate, day)
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayState,
        event: &Event,
    ) -> Result<(), LedgerError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.booking_dates);
        Ok(())
    }

    pub(super) fn date_of(&self, id: &Ulid) -> Option<NaiveDate> {
        self.booking_dates.get(id).map(|e| *e.value())
    }
}
