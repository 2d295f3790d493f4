//! Per-tenant byte accounting
//!
//! The ledger is pure accounting: it tracks used and quota bytes per
//! tenant and exposes atomic reserve/release operations. Watermark
//! policy (when to evict) lives in the coordinator, not here.

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{CommuneError, Result};

#[derive(Debug, Clone, Copy)]
struct TenantAccount {
    quota_bytes: u64,
    used_bytes: u64,
}

/// Tracks used/quota bytes for every registered tenant.
///
/// All operations on a single tenant are atomic: `reserve` either
/// commits the full increment or leaves the account untouched.
#[derive(Debug, Default)]
pub struct TenantLedger {
    accounts: DashMap<Uuid, TenantAccount>,
}

impl TenantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant with a fixed quota. Registering an existing
    /// tenant id is a configuration error.
    pub fn register(&self, tenant_id: Uuid, quota_bytes: u64) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.accounts.entry(tenant_id) {
            Entry::Occupied(_) => Err(CommuneError::Config(format!(
                "tenant {tenant_id} already registered"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(TenantAccount {
                    quota_bytes,
                    used_bytes: 0,
                });
                Ok(())
            }
        }
    }

    /// Remove a tenant's account entirely
    pub fn deregister(&self, tenant_id: Uuid) {
        self.accounts.remove(&tenant_id);
    }

    pub fn is_registered(&self, tenant_id: Uuid) -> bool {
        self.accounts.contains_key(&tenant_id)
    }

    /// Atomically reserve bytes against a tenant's quota. Fails without
    /// mutating state when the reservation would exceed the quota.
    pub fn reserve(&self, tenant_id: Uuid, bytes: u64) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&tenant_id)
            .ok_or(CommuneError::UnknownTenant(tenant_id))?;

        let new_used = account.used_bytes.saturating_add(bytes);
        if new_used > account.quota_bytes {
            return Err(CommuneError::QuotaExceeded {
                tenant: tenant_id,
                requested_bytes: bytes,
                available_bytes: account.quota_bytes - account.used_bytes,
            });
        }
        account.used_bytes = new_used;
        Ok(())
    }

    /// Release previously reserved bytes, floored at zero. Underflow is
    /// a caller bug: it trips a debug assertion and is logged rather
    /// than being allowed to corrupt the account.
    pub fn release(&self, tenant_id: Uuid, bytes: u64) {
        if let Some(mut account) = self.accounts.get_mut(&tenant_id) {
            if bytes > account.used_bytes {
                tracing::error!(
                    %tenant_id,
                    release_bytes = bytes,
                    used_bytes = account.used_bytes,
                    "ledger release underflow, flooring at zero"
                );
                debug_assert!(bytes <= account.used_bytes, "ledger release underflow");
                account.used_bytes = 0;
            } else {
                account.used_bytes -= bytes;
            }
        }
    }

    /// Reset a tenant's used bytes to zero (drain path)
    pub fn zero(&self, tenant_id: Uuid) {
        if let Some(mut account) = self.accounts.get_mut(&tenant_id) {
            account.used_bytes = 0;
        }
    }

    pub fn used_bytes(&self, tenant_id: Uuid) -> Result<u64> {
        self.accounts
            .get(&tenant_id)
            .map(|a| a.used_bytes)
            .ok_or(CommuneError::UnknownTenant(tenant_id))
    }

    pub fn quota_bytes(&self, tenant_id: Uuid) -> Result<u64> {
        self.accounts
            .get(&tenant_id)
            .map(|a| a.quota_bytes)
            .ok_or(CommuneError::UnknownTenant(tenant_id))
    }

    /// Current utilization as a percentage of quota
    pub fn utilization_percent(&self, tenant_id: Uuid) -> Result<f64> {
        let account = self
            .accounts
            .get(&tenant_id)
            .ok_or(CommuneError::UnknownTenant(tenant_id))?;
        if account.quota_bytes == 0 {
            return Ok(0.0);
        }
        Ok(account.used_bytes as f64 / account.quota_bytes as f64 * 100.0)
    }

    /// All registered tenant ids, sorted for deterministic iteration
    pub fn tenant_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.accounts.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}
