//! Error types for Commune

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Commune operations
#[derive(Error, Debug)]
pub enum CommuneError {
    /// Store would push the tenant over its quota, even after eviction.
    /// Recoverable: the caller can shrink the payload, delete stale
    /// entries, or provision a larger quota.
    #[error(
        "quota exceeded for tenant {tenant}: requested {requested_bytes} bytes, {available_bytes} available"
    )]
    QuotaExceeded {
        tenant: Uuid,
        requested_bytes: u64,
        available_bytes: u64,
    },

    /// Entry does not exist or is not visible to the caller
    #[error("entry not found: {0}")]
    NotFound(Uuid),

    /// Cross-tenant access without a valid, unexpired, unrevoked grant
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Grant or revoke attempted on an entry the caller does not own
    #[error("tenant {tenant} does not own entry {entry}")]
    NotOwner { tenant: Uuid, entry: Uuid },

    /// Tenant id is not registered with the coordinator
    #[error("unknown tenant: {0}")]
    UnknownTenant(Uuid),

    /// Decompression or load integrity check failed. The offending
    /// entry is quarantined; this is a data-integrity incident, not a
    /// recoverable condition.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Operation deadline elapsed before completion
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Snapshot serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Commune operations
pub type Result<T> = std::result::Result<T, CommuneError>;
