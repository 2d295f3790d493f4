//! In-memory entry store
//!
//! Owns the id → entry mapping plus a per-tenant index in insertion
//! order. The store performs no size accounting at all; bytes are
//! strictly the ledger's concern, which keeps the two testable in
//! isolation.

use dashmap::DashMap;
use uuid::Uuid;

use crate::memory::types::MemoryEntry;

/// Concurrent map of stored entries, indexed by id and by owning tenant.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<Uuid, MemoryEntry>,
    /// Per-tenant entry ids in insertion order; stable ordering keeps
    /// eviction selection deterministic under equal access times
    tenant_index: DashMap<Uuid, Vec<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning its id
    pub fn put(&self, entry: MemoryEntry) -> Uuid {
        let id = entry.id;
        let tenant_id = entry.tenant_id;
        self.entries.insert(id, entry);
        self.tenant_index.entry(tenant_id).or_default().push(id);
        id
    }

    /// Fetch an entry by id, bumping its access tracking
    pub fn get(&self, id: Uuid) -> Option<MemoryEntry> {
        self.entries.get_mut(&id).map(|mut entry| {
            entry.mark_accessed();
            entry.clone()
        })
    }

    /// Fetch an entry without touching access tracking. Used by
    /// eviction scans and snapshots, which are not "use".
    pub fn peek(&self, id: Uuid) -> Option<MemoryEntry> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    /// Owning tenant of an entry, if it exists
    pub fn owner_of(&self, id: Uuid) -> Option<Uuid> {
        self.entries.get(&id).map(|entry| entry.tenant_id)
    }

    /// Remove an entry, returning it so the caller can release its
    /// ledger reservation
    pub fn remove(&self, id: Uuid) -> Option<MemoryEntry> {
        let (_, entry) = self.entries.remove(&id)?;
        if let Some(mut ids) = self.tenant_index.get_mut(&entry.tenant_id) {
            ids.retain(|candidate| *candidate != id);
        }
        Some(entry)
    }

    /// Ids of all live entries owned by a tenant, in insertion order
    pub fn list_by_tenant(&self, tenant_id: Uuid) -> Vec<Uuid> {
        self.tenant_index
            .get(&tenant_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn entry_count(&self, tenant_id: Uuid) -> usize {
        self.tenant_index
            .get(&tenant_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Stored bytes and entry count for a tenant, read in one pass over
    /// its live entries. Both numbers describe the same observed entry
    /// set, so callers get a pair that is never torn against a
    /// concurrent insert or removal.
    pub fn usage(&self, tenant_id: Uuid) -> (u64, usize) {
        let mut stored_bytes = 0u64;
        let mut count = 0usize;
        for id in self.list_by_tenant(tenant_id) {
            if let Some(entry) = self.entries.get(&id) {
                stored_bytes += entry.stored_size_bytes;
                count += 1;
            }
        }
        (stored_bytes, count)
    }

    /// Remove every entry owned by a tenant, returning them (drain path)
    pub fn remove_tenant(&self, tenant_id: Uuid) -> Vec<MemoryEntry> {
        let ids = self
            .tenant_index
            .remove(&tenant_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|(_, entry)| entry))
            .collect()
    }

    /// Total live entries across all tenants
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
