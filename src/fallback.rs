use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::warn;

use crate::availability::AvailabilityResolver;
use crate::ledger::LedgerError;
use crate::model::*;

struct CachedView {
    view: AvailabilityView,
    stored_at: Instant,
}

/// Availability with degradation: live answer first, then the last good
/// answer for the date (if younger than `ttl`), then every slot shown open.
///
/// Each call retries the live store; nothing is sticky.
pub struct FallbackChain {
    resolver: AvailabilityResolver,
    cache: DashMap<NaiveDate, CachedView>,
    ttl: Duration,
    timeout: Duration,
}

impl FallbackChain {
    pub fn new(resolver: AvailabilityResolver, ttl: Duration, timeout: Duration) -> Self {
        Self {
            resolver,
            cache: DashMap::new(),
            ttl,
            timeout,
        }
    }

    pub fn resolver(&self) -> &AvailabilityResolver {
        &self.resolver
    }

    /// Never fails; check `provenance` to tell live answers from fallbacks.
    pub async fn availability(&self, date: NaiveDate) -> AvailabilityView {
        let view = match self.try_primary(date).await {
            Ok(view) => {
                self.cache.insert(
                    date,
                    CachedView {
                        view: view.clone(),
                        stored_at: Instant::now(),
                    },
                );
                view
            }
            Err(e) => self.degraded(date, &e),
        };
        metrics::counter!(
            crate::observability::AVAILABILITY_TOTAL,
            "provenance" => view.provenance.as_str()
        )
        .increment(1);
        view
    }

    /// Timeout counts as a store failure.
    async fn try_primary(&self, date: NaiveDate) -> Result<AvailabilityView, LedgerError> {
        match tokio::time::timeout(self.timeout, self.resolver.resolve(date)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::StoreUnavailable(format!(
                "no answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn degraded(&self, date: NaiveDate, cause: &LedgerError) -> AvailabilityView {
        if let Some(view) = self.cached(date) {
            warn!("availability for {date} served from cache: {cause}");
            return AvailabilityView {
                provenance: Provenance::DegradedCache,
                stale: true,
                ..view
            };
        }
        warn!("availability for {date} generated without occupancy: {cause}");
        let slots = self
            .resolver
            .slot_generator()
            .generate(date)
            .into_iter()
            .map(|slot| SlotAvailability {
                slot,
                is_booked: false,
            })
            .collect();
        AvailabilityView {
            date,
            slots,
            provenance: Provenance::DegradedGenerated,
            stale: false,
            computed_at: now_ms(),
        }
    }

    fn cached(&self, date: NaiveDate) -> Option<AvailabilityView> {
        if let Some(entry) = self.cache.get(&date)
            && entry.stored_at.elapsed() <= self.ttl
        {
            return Some(entry.view.clone());
        }
        self.evict_if_expired(date);
        None
    }

    /// Freshness is re-checked under the shard lock, so an entry refreshed
    /// by a concurrent primary answer survives.
    fn evict_if_expired(&self, date: NaiveDate) -> bool {
        self.cache
            .remove_if(&date, |_, c| c.stored_at.elapsed() > self.ttl)
            .is_some()
    }

    /// Drop cache entries older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, c| c.stored_at.elapsed() <= self.ttl);
        before.saturating_sub(self.cache.len())
    }

    pub fn cached_dates(&self) -> usize {
        self.cache.len()
    }
}
