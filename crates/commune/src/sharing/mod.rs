//! Cross-tenant sharing
//!
//! The broker owns the table of sharing grants and mediates every
//! retrieval that crosses a tenant boundary. A grant authorizes
//! visibility at a given access level; it never transfers ownership of
//! the underlying entry or its byte accounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CommuneError, Result};
use crate::memory::types::{AccessLevel, MemoryEntry, SharedGrant};
use crate::storage::MemoryStore;

/// Manages sharing grants between tenants and resolves cross-tenant
/// retrieval requests against them.
pub struct CrossTenantBroker {
    store: Arc<MemoryStore>,
    grants: DashMap<Uuid, SharedGrant>,
}

impl CrossTenantBroker {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            grants: DashMap::new(),
        }
    }

    /// Create a grant authorizing `target_tenant` to access `entry_id`.
    /// Fails with `NotOwner` when `source_tenant` does not own the
    /// entry, `NotFound` when the entry does not exist at all.
    pub fn grant(
        &self,
        source_tenant: Uuid,
        entry_id: Uuid,
        target_tenant: Uuid,
        access_level: AccessLevel,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        match self.store.owner_of(entry_id) {
            None => return Err(CommuneError::NotFound(entry_id)),
            Some(owner) if owner != source_tenant => {
                return Err(CommuneError::NotOwner {
                    tenant: source_tenant,
                    entry: entry_id,
                });
            }
            Some(_) => {}
        }

        let grant = SharedGrant::new(
            source_tenant,
            target_tenant,
            entry_id,
            access_level,
            expires_at,
        );
        let grant_id = grant.id;
        debug!(%grant_id, %source_tenant, %target_tenant, %entry_id, ?access_level, "grant created");
        self.grants.insert(grant_id, grant);
        Ok(grant_id)
    }

    /// Revoke a grant. Only the source tenant may revoke; revoking a
    /// grant that no longer exists is a no-op, so revocation is
    /// idempotent.
    pub fn revoke(&self, requesting_tenant: Uuid, grant_id: Uuid) -> Result<()> {
        let Some(grant) = self.grants.get(&grant_id).map(|g| g.clone()) else {
            return Ok(());
        };
        if grant.source_tenant != requesting_tenant {
            return Err(CommuneError::NotOwner {
                tenant: requesting_tenant,
                entry: grant.entry_id,
            });
        }
        self.grants.remove(&grant_id);
        debug!(%grant_id, "grant revoked");
        Ok(())
    }

    /// Validate a grant for a requesting tenant, returning the grant
    /// record. Fails with `AccessDenied` when the grant is missing
    /// (revoked), expired, or held by a different tenant.
    pub fn resolve_grant(&self, requesting_tenant: Uuid, grant_id: Uuid) -> Result<SharedGrant> {
        let grant = self
            .grants
            .get(&grant_id)
            .map(|g| g.clone())
            .ok_or_else(|| {
                CommuneError::AccessDenied(format!("grant {grant_id} does not exist or was revoked"))
            })?;

        if grant.target_tenant != requesting_tenant {
            return Err(CommuneError::AccessDenied(format!(
                "grant {grant_id} is not held by tenant {requesting_tenant}"
            )));
        }
        if grant.is_expired(Utc::now()) {
            return Err(CommuneError::AccessDenied(format!(
                "grant {grant_id} has expired"
            )));
        }
        Ok(grant)
    }

    /// Find a live grant authorizing `requesting_tenant` on `entry_id`,
    /// if any exists. Lets a grantee address shared entries by entry id
    /// rather than grant id. Expired grants are skipped, not pruned.
    pub fn grant_for(&self, entry_id: Uuid, requesting_tenant: Uuid) -> Option<SharedGrant> {
        let now = Utc::now();
        self.grants.iter().find_map(|grant| {
            (grant.entry_id == entry_id
                && grant.target_tenant == requesting_tenant
                && !grant.is_expired(now))
            .then(|| grant.value().clone())
        })
    }

    /// Resolve a grant to its underlying entry, bumping the entry's
    /// access tracking. A grant whose entry has been deleted is pruned
    /// on the spot and reported as `NotFound`.
    pub fn resolve(&self, requesting_tenant: Uuid, grant_id: Uuid) -> Result<MemoryEntry> {
        let grant = self.resolve_grant(requesting_tenant, grant_id)?;
        match self.store.get(grant.entry_id) {
            Some(entry) => Ok(entry),
            None => {
                // Entry deleted out from under the grant; lazy pruning
                self.grants.remove(&grant_id);
                Err(CommuneError::NotFound(grant.entry_id))
            }
        }
    }

    /// Drop every grant referencing a deleted entry
    pub fn invalidate_entry(&self, entry_id: Uuid) {
        self.grants.retain(|_, grant| grant.entry_id != entry_id);
    }

    /// Drop every grant where the tenant appears as source or target
    /// (tenant drain/destroy path)
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.grants.retain(|_, grant| {
            grant.source_tenant != tenant_id && grant.target_tenant != tenant_id
        });
    }

    /// Number of live grants, for stats and tests
    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }
}
