use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ledger::Ledger;
use crate::service::BookingService;

/// Compact the WAL once enough appends have piled up since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(ledger: &Ledger, threshold: u64) -> bool {
    let appends = ledger.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match ledger.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: periodic WAL compaction.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&ledger, threshold).await;
    }
}

/// Background task: drop fallback cache entries past their TTL.
pub async fn run_cache_reaper(service: Arc<BookingService>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let fallback = service.fallback();
        let removed = fallback.sweep_expired();
        if removed > 0 {
            debug!("reaped {removed} expired availability cache entries");
        }
        metrics::gauge!(crate::observability::CACHE_ENTRIES).set(fallback.cached_dates() as f64);
    }
}
