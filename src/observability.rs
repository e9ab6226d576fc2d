use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotledger_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotledger_query_duration_seconds";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: availability answers. Labels: provenance.
pub const AVAILABILITY_TOTAL: &str = "slotledger_availability_total";

/// Counter: create attempts rejected because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotledger_slot_conflicts_total";

pub const BOOKINGS_CREATED_TOTAL: &str = "slotledger_bookings_created_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotledger_bookings_cancelled_total";

/// Gauge: dates held in the availability fallback cache.
pub const CACHE_ENTRIES: &str = "slotledger_cache_entries";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotledger_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotledger_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotledger_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotledger_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None; a
/// failure to bind is logged and the server runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("metrics exporter not installed: {e}"),
    }
}

/// Short label for a command, used on query metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::CancelBooking { .. } => "cancel_booking",
    }
}
