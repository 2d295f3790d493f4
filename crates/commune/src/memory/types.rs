//! Memory types for the Commune system
//!
//! Defines core data structures for the shared store: the MemoryEntry
//! unit, cross-tenant sharing grants, and statistics snapshots.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The atomic unit of stored content plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier, generated at store time
    pub id: Uuid,
    /// Owning tenant; set at creation, never transferred
    pub tenant_id: Uuid,
    /// Size of the original uncompressed payload
    pub raw_size_bytes: u64,
    /// Size actually counted against quota (post-compression when compressed)
    pub stored_size_bytes: u64,
    /// Whether the payload is stored compressed
    pub compressed: bool,
    /// Algorithm tag, present exactly when `compressed` is true
    pub compression_algorithm: Option<CompressionAlgorithm>,
    /// The stored bytes (compressed or raw)
    pub payload: Vec<u8>,
    /// Optional fixed-length vector produced by the external embedding
    /// provider at store time; never recomputed internally
    pub embedding: Option<Vec<f32>>,
    /// Categorization tags, order-irrelevant
    pub tags: BTreeSet<String>,
    /// When this entry was created
    pub created_at: DateTime<Utc>,
    /// When this entry was last retrieved
    pub last_accessed: DateTime<Utc>,
    /// How many times this entry has been retrieved
    pub access_count: u32,
}

impl MemoryEntry {
    /// Create a new entry holding a raw (uncompressed) payload
    pub fn new_raw(tenant_id: Uuid, payload: Vec<u8>, tags: BTreeSet<String>) -> Self {
        let size = payload.len() as u64;
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            raw_size_bytes: size,
            stored_size_bytes: size,
            compressed: false,
            compression_algorithm: None,
            payload,
            embedding: None,
            tags,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Create a new entry holding a compressed payload
    pub fn new_compressed(
        tenant_id: Uuid,
        compressed_payload: Vec<u8>,
        raw_size_bytes: u64,
        algorithm: CompressionAlgorithm,
        tags: BTreeSet<String>,
    ) -> Self {
        let stored = compressed_payload.len() as u64;
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            raw_size_bytes,
            stored_size_bytes: stored,
            compressed: true,
            compression_algorithm: Some(algorithm),
            payload: compressed_payload,
            embedding: None,
            tags,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Mark this entry as accessed, updating access count and timestamp
    pub fn mark_accessed(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}

/// Compression algorithm applied to a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// Zstandard at the crate default level
    Zstd,
}

/// Access level carried by a sharing grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLevel {
    /// Retrieval only
    Read,
    /// Retrieval plus mutation (mutation writes a new source-owned entry)
    ReadWrite,
}

/// An authorization record permitting one tenant to access another's
/// entry. A grant never transfers ownership of the underlying entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedGrant {
    /// Unique identifier for this grant
    pub id: Uuid,
    /// Tenant that owns the entry and created the grant
    pub source_tenant: Uuid,
    /// Tenant authorized to access the entry
    pub target_tenant: Uuid,
    /// The entry being shared
    pub entry_id: Uuid,
    /// What the target tenant is allowed to do
    pub access_level: AccessLevel,
    /// Optional expiry; a grant past this instant resolves as denied
    pub expires_at: Option<DateTime<Utc>>,
    /// When this grant was created
    pub created_at: DateTime<Utc>,
}

impl SharedGrant {
    pub fn new(
        source_tenant: Uuid,
        target_tenant: Uuid,
        entry_id: Uuid,
        access_level: AccessLevel,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_tenant,
            target_tenant,
            entry_id,
            access_level,
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Whether the grant has passed its expiry instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Per-tenant statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantStats {
    pub tenant_id: Uuid,
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub utilization_percent: f64,
    pub entry_count: usize,
}

/// Statistics aggregated across all tenants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub tenant_count: usize,
    pub total_used_bytes: u64,
    pub total_quota_bytes: u64,
    pub total_entry_count: usize,
    /// Per-tenant breakdown, sorted by tenant id for determinism
    pub tenants: Vec<TenantStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_entry_serialization_roundtrip() {
        let mut entry = MemoryEntry::new_raw(
            Uuid::new_v4(),
            b"Test content".to_vec(),
            tags(&["notes", "test"]),
        );
        entry.embedding = Some(vec![0.1; 384]);

        let json = serde_json::to_string(&entry).expect("Failed to serialize entry");
        let deserialized: MemoryEntry =
            serde_json::from_str(&json).expect("Failed to deserialize entry");

        assert_eq!(entry.id, deserialized.id);
        assert_eq!(entry.tenant_id, deserialized.tenant_id);
        assert_eq!(entry.payload, deserialized.payload);
        assert_eq!(entry.tags, deserialized.tags);
        assert_eq!(
            entry.embedding.as_ref().map(Vec::len),
            deserialized.embedding.as_ref().map(Vec::len)
        );
    }

    #[test]
    fn test_new_raw_defaults() {
        let payload = b"hello".to_vec();
        let entry = MemoryEntry::new_raw(Uuid::new_v4(), payload.clone(), BTreeSet::new());

        assert_eq!(entry.raw_size_bytes, payload.len() as u64);
        assert_eq!(entry.stored_size_bytes, payload.len() as u64);
        assert!(!entry.compressed);
        assert!(entry.compression_algorithm.is_none());
        assert!(entry.embedding.is_none());
        assert_eq!(entry.access_count, 0);
    }

    #[test]
    fn test_new_compressed_records_both_sizes() {
        let entry = MemoryEntry::new_compressed(
            Uuid::new_v4(),
            vec![1, 2, 3],
            1000,
            CompressionAlgorithm::Zstd,
            BTreeSet::new(),
        );

        assert!(entry.compressed);
        assert_eq!(entry.compression_algorithm, Some(CompressionAlgorithm::Zstd));
        assert_eq!(entry.raw_size_bytes, 1000);
        assert_eq!(entry.stored_size_bytes, 3);
    }

    #[test]
    fn test_mark_accessed() {
        let mut entry = MemoryEntry::new_raw(Uuid::new_v4(), vec![0u8; 8], BTreeSet::new());
        let before = entry.last_accessed;

        entry.mark_accessed();

        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed >= before);
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let grant = SharedGrant::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessLevel::Read,
            Some(now + chrono::Duration::seconds(60)),
        );

        assert!(!grant.is_expired(now));
        assert!(grant.is_expired(now + chrono::Duration::seconds(61)));

        let open_ended = SharedGrant::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessLevel::ReadWrite,
            None,
        );
        assert!(!open_ended.is_expired(now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_access_level_serialization() {
        for level in [AccessLevel::Read, AccessLevel::ReadWrite] {
            let json = serde_json::to_string(&level).expect("Failed to serialize");
            let deserialized: AccessLevel =
                serde_json::from_str(&json).expect("Failed to deserialize");
            assert_eq!(level, deserialized);
        }
    }
}
