//! Coordinator façade
//!
//! The single entry point callers hold: tenant lifecycle, store and
//! retrieve, cross-tenant sharing, statistics, and snapshots. The
//! coordinator owns the locking discipline: per-tenant mutation is
//! serialized by a per-tenant async mutex, and the mutex is never held
//! across a call to an external collaborator. Construct one per process
//! and pass it by handle; there is no ambient global instance.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compress::Compressor;
use crate::config::Config;
use crate::error::{CommuneError, Result};
use crate::ledger::TenantLedger;
use crate::memory::types::{
    AccessLevel, AggregateStats, CompressionAlgorithm, MemoryEntry, TenantStats,
};
use crate::provider::{EmbeddingProvider, VectorIndex};
use crate::sharing::CrossTenantBroker;
use crate::storage::{MemoryStore, QuotaEvictor, TenantSnapshot};

/// Tracks an operation's time budget. `None` means unbounded.
struct Deadline {
    expires_at: Option<tokio::time::Instant>,
}

impl Deadline {
    fn after(budget: Option<Duration>) -> Self {
        Self {
            expires_at: budget.map(|d| tokio::time::Instant::now() + d),
        }
    }

    /// Remaining budget, or `DeadlineExceeded` once elapsed
    fn remaining(&self) -> Result<Option<Duration>> {
        match self.expires_at {
            None => Ok(None),
            Some(at) => {
                let now = tokio::time::Instant::now();
                if now >= at {
                    Err(CommuneError::DeadlineExceeded)
                } else {
                    Ok(Some(at - now))
                }
            }
        }
    }
}

/// Releases a ledger reservation on drop unless explicitly committed.
/// Every abort path between reserve and insert goes through this guard,
/// so a failed or cancelled store never leaks reserved bytes.
struct ReservationGuard<'a> {
    ledger: &'a TenantLedger,
    tenant_id: Uuid,
    bytes: u64,
    committed: bool,
}

impl<'a> ReservationGuard<'a> {
    fn acquire(ledger: &'a TenantLedger, tenant_id: Uuid, bytes: u64) -> Result<Self> {
        ledger.reserve(tenant_id, bytes)?;
        Ok(Self {
            ledger,
            tenant_id,
            bytes,
            committed: false,
        })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.ledger.release(self.tenant_id, self.bytes);
        }
    }
}

/// The public façade over the coordination layer.
pub struct Coordinator {
    config: Config,
    store: Arc<MemoryStore>,
    ledger: TenantLedger,
    broker: CrossTenantBroker,
    compressor: Compressor,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
    tenant_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Coordinator {
    /// Build a coordinator from a validated configuration, without
    /// external collaborators. Attach them with
    /// [`with_embedding_provider`](Self::with_embedding_provider) and
    /// [`with_vector_index`](Self::with_vector_index).
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(MemoryStore::new());
        let broker = CrossTenantBroker::new(Arc::clone(&store));
        let compressor = Compressor::new(config.compression_threshold_bytes);
        Ok(Self {
            config,
            store,
            ledger: TenantLedger::new(),
            broker,
            compressor,
            embedder: None,
            index: None,
            tenant_locks: DashMap::new(),
        })
    }

    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ------------------------------------------------------------------
    // Tenant lifecycle

    /// Create a tenant with the given quota, or the configured default
    /// when `None`.
    pub fn create_tenant(&self, quota_bytes: Option<u64>) -> Result<Uuid> {
        let quota = quota_bytes.unwrap_or(self.config.tenant_default_quota_bytes);
        if quota == 0 {
            return Err(CommuneError::Config(
                "tenant quota must be positive".to_string(),
            ));
        }
        let tenant_id = Uuid::new_v4();
        self.ledger.register(tenant_id, quota)?;
        info!(%tenant_id, quota_bytes = quota, "tenant created");
        Ok(tenant_id)
    }

    /// Remove all of a tenant's entries, invalidate every grant that
    /// referenced them, then zero the ledger — in that order, so no
    /// observer sees a zeroed quota with entries still present.
    pub async fn drain_tenant(&self, tenant_id: Uuid) -> Result<()> {
        if !self.ledger.is_registered(tenant_id) {
            return Err(CommuneError::UnknownTenant(tenant_id));
        }
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let removed = self.store.remove_tenant(tenant_id);
        for entry in &removed {
            self.broker.invalidate_entry(entry.id);
        }
        self.ledger.zero(tenant_id);
        drop(_guard);

        self.unindex_all(removed.iter().map(|e| e.id)).await;
        info!(%tenant_id, entries = removed.len(), "tenant drained");
        Ok(())
    }

    /// Drain a tenant, drop grants in both directions, and deregister
    /// its ledger account entirely.
    pub async fn destroy_tenant(&self, tenant_id: Uuid) -> Result<()> {
        self.drain_tenant(tenant_id).await?;
        self.broker.invalidate_tenant(tenant_id);
        self.ledger.deregister(tenant_id);
        self.tenant_locks.remove(&tenant_id);
        info!(%tenant_id, "tenant destroyed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Store / retrieve

    /// Store content under a tenant, returning the new entry id.
    ///
    /// The embedding call (if a provider is attached) runs before the
    /// per-tenant lock is taken and is bounded by the configured
    /// embedding timeout; its failure downgrades to a warning and the
    /// entry is stored without an embedding. If the reservation does
    /// not fit, one eviction pass is attempted before the store fails
    /// with `QuotaExceeded`.
    pub async fn store(
        &self,
        tenant_id: Uuid,
        content: Vec<u8>,
        tags: BTreeSet<String>,
        deadline: Option<Duration>,
    ) -> Result<Uuid> {
        if !self.ledger.is_registered(tenant_id) {
            return Err(CommuneError::UnknownTenant(tenant_id));
        }
        let deadline = Deadline::after(deadline);

        // External call first, never under the tenant lock
        let embedding = self.embed_best_effort(&content, &deadline).await?;

        let lock = self.tenant_lock(tenant_id);
        let _guard = match deadline.remaining()? {
            Some(budget) => tokio::time::timeout(budget, lock.lock())
                .await
                .map_err(|_| CommuneError::DeadlineExceeded)?,
            None => lock.lock().await,
        };

        let mut entry = self.build_entry(tenant_id, content, tags)?;
        entry.embedding = embedding;
        let stored_bytes = entry.stored_size_bytes;

        let reservation =
            match ReservationGuard::acquire(&self.ledger, tenant_id, stored_bytes) {
                Ok(guard) => guard,
                Err(CommuneError::QuotaExceeded { .. }) => {
                    // One eviction pass, then the retry's verdict is final
                    let outcome = self.evictor().evict_to_low_water(tenant_id, None)?;
                    for evicted in &outcome.evicted {
                        self.broker.invalidate_entry(*evicted);
                    }
                    let guard =
                        ReservationGuard::acquire(&self.ledger, tenant_id, stored_bytes)?;
                    self.unindex_later(outcome.evicted);
                    guard
                }
                Err(other) => return Err(other),
            };

        let entry_id = self.store.put(entry);
        reservation.commit();

        debug!(
            %tenant_id,
            %entry_id,
            stored_bytes,
            utilization = self.ledger.utilization_percent(tenant_id)?,
            "entry stored"
        );

        // High-water check runs inside the lock so the eviction pass is
        // serialized with other mutations for this tenant
        let mut evicted_ids = Vec::new();
        if self.ledger.utilization_percent(tenant_id)? >= self.config.high_water_mark_percent {
            let outcome = self
                .evictor()
                .evict_to_low_water(tenant_id, Some(entry_id))?;
            for evicted in &outcome.evicted {
                self.broker.invalidate_entry(*evicted);
            }
            if !outcome.reached_low_water {
                warn!(
                    %tenant_id,
                    utilization = self.ledger.utilization_percent(tenant_id)?,
                    "eviction could not reach the low-water mark"
                );
            }
            evicted_ids = outcome.evicted;
        }
        drop(_guard);

        self.unindex_all(evicted_ids.into_iter()).await;
        if let (Some(index), Some(vector)) = (
            &self.index,
            self.store.peek(entry_id).and_then(|e| e.embedding),
        ) {
            if let Err(e) = index.index(entry_id, &vector).await {
                warn!(%entry_id, error = %e, "vector index insertion failed");
            }
        }

        Ok(entry_id)
    }

    /// Retrieve the decompressed content of an entry. The owner reads
    /// its own entries directly; any other tenant must hold a live
    /// grant naming it, otherwise the call fails with `AccessDenied`.
    /// A missing entry is `NotFound` for everyone.
    pub async fn retrieve(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let deadline = Deadline::after(deadline);
        deadline.remaining()?;

        match self.store.owner_of(entry_id) {
            None => return Err(CommuneError::NotFound(entry_id)),
            Some(owner) if owner != tenant_id => {
                if self.broker.grant_for(entry_id, tenant_id).is_none() {
                    return Err(CommuneError::AccessDenied(format!(
                        "tenant {tenant_id} holds no grant for entry {entry_id}"
                    )));
                }
            }
            Some(_) => {}
        }
        // get() bumps access tracking for owner and grantee alike
        let entry = self
            .store
            .get(entry_id)
            .ok_or(CommuneError::NotFound(entry_id))?;
        self.unpack(entry).await
    }

    /// Entry metadata (sizes, compression flags, tags, embedding) for
    /// an entry owned by the calling tenant. Does not count as access.
    pub fn metadata(&self, tenant_id: Uuid, entry_id: Uuid) -> Result<MemoryEntry> {
        match self.store.peek(entry_id) {
            Some(entry) if entry.tenant_id == tenant_id => Ok(entry),
            _ => Err(CommuneError::NotFound(entry_id)),
        }
    }

    /// Delete an entry owned by the calling tenant, releasing its bytes
    /// and invalidating any grants that referenced it.
    pub async fn delete(&self, tenant_id: Uuid, entry_id: Uuid) -> Result<()> {
        match self.store.owner_of(entry_id) {
            Some(owner) if owner == tenant_id => {}
            _ => return Err(CommuneError::NotFound(entry_id)),
        }

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;
        let Some(entry) = self.store.remove(entry_id) else {
            return Err(CommuneError::NotFound(entry_id));
        };
        self.ledger.release(tenant_id, entry.stored_size_bytes);
        self.broker.invalidate_entry(entry_id);
        drop(_guard);

        self.unindex_all(std::iter::once(entry_id)).await;
        debug!(%tenant_id, %entry_id, "entry deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sharing

    /// Grant another tenant access to one of the caller's entries.
    pub fn share(
        &self,
        source_tenant: Uuid,
        entry_id: Uuid,
        target_tenant: Uuid,
        access_level: AccessLevel,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        if !self.ledger.is_registered(target_tenant) {
            return Err(CommuneError::UnknownTenant(target_tenant));
        }
        self.broker
            .grant(source_tenant, entry_id, target_tenant, access_level, expires_at)
    }

    /// Revoke a previously issued grant; idempotent.
    pub fn revoke_share(&self, source_tenant: Uuid, grant_id: Uuid) -> Result<()> {
        self.broker.revoke(source_tenant, grant_id)
    }

    /// Retrieve shared content through a grant.
    pub async fn retrieve_shared(&self, tenant_id: Uuid, grant_id: Uuid) -> Result<Vec<u8>> {
        let entry = self.broker.resolve(tenant_id, grant_id)?;
        self.unpack(entry).await
    }

    /// Mutate through a read-write grant. The mutation writes a new
    /// entry owned by — and charged to — the original source tenant,
    /// and issues a fresh grant for it; quota liability never moves to
    /// the grantee. Returns the new `(entry_id, grant_id)` pair.
    pub async fn write_shared(
        &self,
        tenant_id: Uuid,
        grant_id: Uuid,
        content: Vec<u8>,
        tags: BTreeSet<String>,
    ) -> Result<(Uuid, Uuid)> {
        let grant = self.broker.resolve_grant(tenant_id, grant_id)?;
        if grant.access_level != AccessLevel::ReadWrite {
            return Err(CommuneError::AccessDenied(format!(
                "grant {grant_id} is read-only"
            )));
        }
        if self.store.owner_of(grant.entry_id).is_none() {
            self.broker.invalidate_entry(grant.entry_id);
            return Err(CommuneError::NotFound(grant.entry_id));
        }

        // The new entry lands on the source tenant's quota
        let new_entry_id = self
            .store(grant.source_tenant, content, tags, None)
            .await?;
        let new_grant_id = self.broker.grant(
            grant.source_tenant,
            new_entry_id,
            grant.target_tenant,
            AccessLevel::ReadWrite,
            grant.expires_at,
        )?;

        debug!(
            source = %grant.source_tenant,
            target = %grant.target_tenant,
            %new_entry_id,
            "read-write grant mutation created new source-owned entry"
        );
        Ok((new_entry_id, new_grant_id))
    }

    // ------------------------------------------------------------------
    // Statistics

    /// Accounting snapshot for one tenant. Usage is derived from one
    /// walk over the tenant's live entries rather than read off the
    /// ledger, so `used_bytes` and `entry_count` always describe the
    /// same entry set even while a store or eviction is in flight.
    pub fn stats(&self, tenant_id: Uuid) -> Result<TenantStats> {
        let quota_bytes = self.ledger.quota_bytes(tenant_id)?;
        let (used_bytes, entry_count) = self.store.usage(tenant_id);
        Ok(TenantStats {
            tenant_id,
            used_bytes,
            quota_bytes,
            utilization_percent: used_bytes as f64 / quota_bytes as f64 * 100.0,
            entry_count,
        })
    }

    /// Statistics aggregated across every registered tenant
    pub fn aggregate_stats(&self) -> AggregateStats {
        let tenants: Vec<TenantStats> = self
            .ledger
            .tenant_ids()
            .into_iter()
            .filter_map(|id| self.stats(id).ok())
            .collect();

        AggregateStats {
            tenant_count: tenants.len(),
            total_used_bytes: tenants.iter().map(|t| t.used_bytes).sum(),
            total_quota_bytes: tenants.iter().map(|t| t.quota_bytes).sum(),
            total_entry_count: tenants.iter().map(|t| t.entry_count).sum(),
            tenants,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots

    /// Serialize a tenant's state to a self-contained byte blob.
    pub async fn snapshot_tenant(&self, tenant_id: Uuid) -> Result<Vec<u8>> {
        if !self.ledger.is_registered(tenant_id) {
            return Err(CommuneError::UnknownTenant(tenant_id));
        }
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;
        TenantSnapshot::capture(&self.store, &self.ledger, tenant_id)?.to_bytes()
    }

    /// Restore a tenant from snapshot bytes, re-deriving its used bytes
    /// from the entry records. The tenant id must not already be
    /// registered.
    pub fn restore_tenant(&self, bytes: &[u8]) -> Result<Uuid> {
        TenantSnapshot::from_bytes(bytes)?.restore(&self.store, &self.ledger)
    }

    // ------------------------------------------------------------------
    // Internals

    fn tenant_lock(&self, tenant_id: Uuid) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn evictor(&self) -> QuotaEvictor<'_> {
        QuotaEvictor::new(
            &self.store,
            &self.ledger,
            self.config.low_water_mark_percent,
            self.config.max_eviction_attempts,
        )
    }

    /// Run the embedding provider under its time budget. Failure and
    /// timeout both downgrade to "no embedding" with a warning; only an
    /// elapsed operation deadline is an error.
    async fn embed_best_effort(
        &self,
        content: &[u8],
        deadline: &Deadline,
    ) -> Result<Option<Vec<f32>>> {
        let Some(provider) = &self.embedder else {
            return Ok(None);
        };

        let mut budget = Duration::from_millis(self.config.embedding_timeout_ms);
        if let Some(remaining) = deadline.remaining()? {
            budget = budget.min(remaining);
        }

        match tokio::time::timeout(budget, provider.embed(content)).await {
            Ok(Ok(vector)) => Ok(Some(vector)),
            Ok(Err(e)) => {
                warn!(provider = provider.name(), error = %e, "embedding failed, storing without embedding");
                Ok(None)
            }
            Err(_) => {
                warn!(provider = provider.name(), budget_ms = budget.as_millis() as u64, "embedding timed out, storing without embedding");
                Ok(None)
            }
        }
    }

    /// Apply the compression decision and build the entry
    fn build_entry(
        &self,
        tenant_id: Uuid,
        content: Vec<u8>,
        tags: BTreeSet<String>,
    ) -> Result<MemoryEntry> {
        let raw_size = content.len() as u64;
        if self.compressor.should_compress(raw_size) {
            let (compressed, ratio) = self.compressor.compress(&content)?;
            if ratio < 1.0 {
                return Ok(MemoryEntry::new_compressed(
                    tenant_id,
                    compressed,
                    raw_size,
                    CompressionAlgorithm::Zstd,
                    tags,
                ));
            }
            debug!(raw_size, ratio, "compression would expand payload, storing raw");
        }
        Ok(MemoryEntry::new_raw(tenant_id, content, tags))
    }

    /// Decompress an entry's payload for return to the caller. A failed
    /// decompression quarantines the entry: it is removed from the live
    /// set, its bytes released, its grants invalidated, and the error
    /// surfaces as `Corruption`.
    async fn unpack(&self, entry: MemoryEntry) -> Result<Vec<u8>> {
        if !entry.compressed {
            return Ok(entry.payload);
        }
        match self.compressor.decompress(&entry.payload) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                error!(
                    entry_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    error = %e,
                    "decompression failed, quarantining entry"
                );
                let lock = self.tenant_lock(entry.tenant_id);
                let _guard = lock.lock().await;
                if let Some(removed) = self.store.remove(entry.id) {
                    self.ledger
                        .release(entry.tenant_id, removed.stored_size_bytes);
                    self.broker.invalidate_entry(entry.id);
                }
                drop(_guard);
                self.unindex_all(std::iter::once(entry.id)).await;
                Err(e)
            }
        }
    }

    /// Best-effort index removals, outside any tenant lock
    async fn unindex_all(&self, ids: impl Iterator<Item = Uuid>) {
        let Some(index) = &self.index else { return };
        for id in ids {
            if let Err(e) = index.remove(id).await {
                warn!(entry_id = %id, error = %e, "vector index removal failed");
            }
        }
    }

    /// Queue index removals from a context that still holds a tenant
    /// lock; the actual external calls run on a detached task.
    fn unindex_later(&self, ids: Vec<Uuid>) {
        if ids.is_empty() {
            return;
        }
        if let Some(index) = &self.index {
            let index = Arc::clone(index);
            tokio::spawn(async move {
                for id in ids {
                    if let Err(e) = index.remove(id).await {
                        warn!(entry_id = %id, error = %e, "vector index removal failed");
                    }
                }
            });
        }
    }
}
