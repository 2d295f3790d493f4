//! Commune - Bounded multi-tenant shared memory coordination layer
//!
//! This crate provides a single-process store shared by multiple
//! cooperating agents ("tenants"): hard per-tenant byte quotas,
//! transparent compression of large payloads, least-recently-accessed
//! eviction under quota pressure, and controlled cross-tenant sharing
//! under an access-level policy. Embedding generation and vector
//! similarity search are consumed through narrow traits and are never
//! load-bearing for storage correctness.

pub mod compress;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod provider;
pub mod sharing;
pub mod storage;
pub mod testing;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{CommuneError, Result};
pub use memory::{AccessLevel, AggregateStats, MemoryEntry, SharedGrant, TenantStats};
