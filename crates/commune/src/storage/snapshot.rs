//! Tenant snapshot serialization
//!
//! Serializes a tenant's live entries to a self-contained byte blob and
//! restores them later. On restore, `used_bytes` is re-derived by
//! summing the records' stored sizes; a total carried inside the
//! snapshot is never trusted, which defends against corrupted ledger
//! state making it back into a live process.
//!
//! File I/O is the caller's concern; this module only produces and
//! consumes bytes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{CommuneError, Result};
use crate::ledger::TenantLedger;
use crate::memory::types::{CompressionAlgorithm, MemoryEntry};
use crate::storage::store::MemoryStore;

/// Snapshot format version, bumped on incompatible layout changes
const SNAPSHOT_VERSION: u32 = 1;

/// One serialized entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub raw_size_bytes: u64,
    pub stored_size_bytes: u64,
    pub compressed: bool,
    pub compression_algorithm: Option<CompressionAlgorithm>,
    pub payload: Vec<u8>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
}

impl From<MemoryEntry> for SnapshotRecord {
    fn from(entry: MemoryEntry) -> Self {
        Self {
            id: entry.id,
            tenant_id: entry.tenant_id,
            raw_size_bytes: entry.raw_size_bytes,
            stored_size_bytes: entry.stored_size_bytes,
            compressed: entry.compressed,
            compression_algorithm: entry.compression_algorithm,
            payload: entry.payload,
            tags: entry.tags,
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
        }
    }
}

impl SnapshotRecord {
    fn into_entry(self) -> MemoryEntry {
        MemoryEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            raw_size_bytes: self.raw_size_bytes,
            stored_size_bytes: self.stored_size_bytes,
            compressed: self.compressed,
            compression_algorithm: self.compression_algorithm,
            payload: self.payload,
            // Embeddings are provider-derived enrichment, not part of
            // the durable format; they are regenerated on demand
            embedding: None,
            tags: self.tags,
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
        }
    }

    fn validate(&self, tenant_id: Uuid) -> Result<()> {
        if self.tenant_id != tenant_id {
            return Err(CommuneError::Corruption(format!(
                "snapshot record {} belongs to tenant {}, expected {tenant_id}",
                self.id, self.tenant_id
            )));
        }
        if self.stored_size_bytes != self.payload.len() as u64 {
            return Err(CommuneError::Corruption(format!(
                "snapshot record {} claims {} stored bytes but payload is {}",
                self.id,
                self.stored_size_bytes,
                self.payload.len()
            )));
        }
        if self.compressed != self.compression_algorithm.is_some() {
            return Err(CommuneError::Corruption(format!(
                "snapshot record {} has inconsistent compression flags",
                self.id
            )));
        }
        Ok(())
    }
}

/// A full per-tenant snapshot: quota plus the entry record sequence
#[derive(Debug, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub version: u32,
    pub tenant_id: Uuid,
    pub quota_bytes: u64,
    pub records: Vec<SnapshotRecord>,
}

impl TenantSnapshot {
    /// Capture a tenant's current state. Uses `peek`, so taking a
    /// snapshot does not count as access.
    pub fn capture(store: &MemoryStore, ledger: &TenantLedger, tenant_id: Uuid) -> Result<Self> {
        let quota_bytes = ledger.quota_bytes(tenant_id)?;
        let records = store
            .list_by_tenant(tenant_id)
            .into_iter()
            .filter_map(|id| store.peek(id))
            .map(SnapshotRecord::from)
            .collect();

        Ok(Self {
            version: SNAPSHOT_VERSION,
            tenant_id,
            quota_bytes,
            records,
        })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CommuneError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: TenantSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| CommuneError::Serialization(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CommuneError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Restore into a store and ledger, registering the tenant and
    /// re-deriving its used bytes from the record sums. Fails when the
    /// tenant is already registered or when the derived total exceeds
    /// the snapshot's quota.
    pub fn restore(self, store: &MemoryStore, ledger: &TenantLedger) -> Result<Uuid> {
        let tenant_id = self.tenant_id;

        let mut derived_used: u64 = 0;
        for record in &self.records {
            record.validate(tenant_id)?;
            derived_used = derived_used.saturating_add(record.stored_size_bytes);
        }
        if derived_used > self.quota_bytes {
            return Err(CommuneError::Corruption(format!(
                "snapshot for tenant {tenant_id} sums to {derived_used} bytes, over its {} byte quota",
                self.quota_bytes
            )));
        }

        ledger.register(tenant_id, self.quota_bytes)?;
        ledger.reserve(tenant_id, derived_used)?;

        let record_count = self.records.len();
        for record in self.records {
            store.put(record.into_entry());
        }

        info!(
            %tenant_id,
            entries = record_count,
            used_bytes = derived_used,
            "tenant restored from snapshot"
        );
        Ok(tenant_id)
    }
}
