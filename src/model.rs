use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Wall-clock time within a day, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const fn hm(hour: u16, minute: u16) -> Self {
        Self(hour * 60 + minute)
    }

    pub fn plus_minutes(self, minutes: u16) -> Self {
        Self(self.0 + minutes)
    }

    /// Parse `HH:MM` or `HH:MM:SS` (seconds must be zero).
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split(':');
        let hour: u16 = parts.next()?.parse().ok()?;
        let minute: u16 = parts.next()?.parse().ok()?;
        if let Some(sec) = parts.next()
            && sec.parse::<u16>().ok()? != 0
        {
            return None;
        }
        if parts.next().is_some() || hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self::hm(hour, minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// A candidate appointment window. `end = start + duration_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub duration_minutes: u16,
}

impl TimeSlot {
    pub fn new(start: TimeOfDay, duration_minutes: u16) -> Self {
        Self {
            start,
            end: start.plus_minutes(duration_minutes),
            duration_minutes,
        }
    }

    pub fn overlaps(&self, start: TimeOfDay, end: TimeOfDay) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        self != BookingStatus::Cancelled
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// pending → confirmed → in_progress → completed, and cancelled from any
    /// non-terminal state.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Completed)
                | (Pending | Confirmed | InProgress, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted booking record. Never removed; cancellation is a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub vehicle_type: String,
    pub vehicle_plate: Option<String>,
    pub service_type: String,
    pub extras: Vec<String>,
    /// Minor currency units.
    pub price_cents: i64,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Candidate booking as received from a caller, validated once by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub client_name: String,
    pub client_phone: Option<String>,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub vehicle_type: String,
    pub vehicle_plate: Option<String>,
    pub service_type: String,
    pub extras: Vec<String>,
    pub price_cents: i64,
    /// Requested initial status; only `pending` or `confirmed` are accepted.
    pub status: Option<BookingStatus>,
    pub notes: Option<String>,
}

/// All booking records for one calendar date, sorted by `start_time`.
/// Records sharing a start keep creation order.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub bookings: Vec<Booking>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.start_time <= booking.start_time);
        self.bookings.insert(pos, booking);
    }

    pub fn active(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_active())
    }

    /// The active booking holding `start`, if any.
    pub fn active_at(&self, start: TimeOfDay) -> Option<&Booking> {
        let from = self.bookings.partition_point(|b| b.start_time < start);
        self.bookings[from..]
            .iter()
            .take_while(|b| b.start_time == start)
            .find(|b| b.is_active())
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

/// How a cancellation identifies its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    Id(Ulid),
    ClientOnDate { client_name: String, date: NaiveDate },
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        date: NaiveDate,
        status: BookingStatus,
        at: Ms,
    },
}

// ── Availability views ───────────────────────────────────────────

/// Where an availability answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Primary,
    DegradedCache,
    DegradedGenerated,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Primary => "primary",
            Provenance::DegradedCache => "degraded_cache",
            Provenance::DegradedGenerated => "degraded_generated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub slot: TimeSlot,
    pub is_booked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityView {
    pub date: NaiveDate,
    pub slots: Vec<SlotAvailability>,
    pub provenance: Provenance,
    /// Set when the occupancy shown was captured before this request.
    pub stale: bool,
    pub computed_at: Ms,
}

impl AvailabilityView {
    /// The "available only" projection.
    pub fn available_slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.iter().filter(|s| !s.is_booked).map(|s| &s.slot)
    }

    pub fn is_degraded(&self) -> bool {
        self.provenance != Provenance::Primary
    }

    /// Structural equality ignoring when the view was computed.
    pub fn same_occupancy(&self, other: &AvailabilityView) -> bool {
        self.date == other.date && self.slots == other.slots && self.provenance == other.provenance
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}
