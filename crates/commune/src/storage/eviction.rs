//! Quota-pressure eviction
//!
//! When a tenant's utilization crosses the high-water mark after a
//! store, the evictor removes least-recently-accessed entries until
//! utilization drops below the low-water mark or nothing evictable
//! remains. Eviction never crosses tenant boundaries: victims are
//! always selected from the over-quota tenant's own entries.

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::TenantLedger;
use crate::storage::store::MemoryStore;

/// Result of an eviction pass
#[derive(Debug, Clone, Default)]
pub struct EvictionOutcome {
    /// Ids of evicted entries, in eviction order. The caller is
    /// responsible for invalidating grants and index entries for these.
    pub evicted: Vec<Uuid>,
    /// Total stored bytes released back to the tenant's ledger
    pub released_bytes: u64,
    /// Whether utilization ended below the low-water mark
    pub reached_low_water: bool,
}

/// Selects and removes eviction victims for a single tenant.
pub struct QuotaEvictor<'a> {
    store: &'a MemoryStore,
    ledger: &'a TenantLedger,
    low_water_mark_percent: f64,
    max_attempts: usize,
}

impl<'a> QuotaEvictor<'a> {
    pub fn new(
        store: &'a MemoryStore,
        ledger: &'a TenantLedger,
        low_water_mark_percent: f64,
        max_attempts: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            low_water_mark_percent,
            max_attempts,
        }
    }

    /// Evict least-recently-accessed entries until the tenant is below
    /// the low-water mark, the attempt bound is hit, or no evictable
    /// entries remain. Each eviction removes the entry from the store
    /// and releases its stored bytes from the ledger.
    ///
    /// `protected` names an entry that is never selected: the store
    /// that triggered this pass must not evict the entry it just wrote.
    pub fn evict_to_low_water(
        &self,
        tenant_id: Uuid,
        protected: Option<Uuid>,
    ) -> Result<EvictionOutcome> {
        let mut outcome = EvictionOutcome::default();

        if self.ledger.utilization_percent(tenant_id)? < self.low_water_mark_percent {
            outcome.reached_low_water = true;
            return Ok(outcome);
        }

        // Snapshot candidates once, oldest access first. Insertion
        // order breaks ties, which keeps selection deterministic.
        let mut candidates: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = self
            .store
            .list_by_tenant(tenant_id)
            .into_iter()
            .filter(|id| Some(*id) != protected)
            .filter_map(|id| self.store.peek(id).map(|e| (id, e.last_accessed)))
            .collect();
        candidates.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (victim_id, _) in candidates {
            if outcome.evicted.len() >= self.max_attempts {
                debug!(
                    %tenant_id,
                    max_attempts = self.max_attempts,
                    "eviction attempt bound reached"
                );
                break;
            }

            let Some(victim) = self.store.remove(victim_id) else {
                // Already removed concurrently; skip
                continue;
            };
            self.ledger.release(tenant_id, victim.stored_size_bytes);
            outcome.released_bytes += victim.stored_size_bytes;
            outcome.evicted.push(victim_id);

            debug!(
                %tenant_id,
                entry_id = %victim_id,
                released_bytes = victim.stored_size_bytes,
                "evicted least-recently-accessed entry"
            );

            if self.ledger.utilization_percent(tenant_id)? < self.low_water_mark_percent {
                outcome.reached_low_water = true;
                break;
            }
        }

        if !outcome.evicted.is_empty() {
            info!(
                %tenant_id,
                evicted = outcome.evicted.len(),
                released_bytes = outcome.released_bytes,
                reached_low_water = outcome.reached_low_water,
                "eviction pass complete"
            );
        }

        Ok(outcome)
    }
}
