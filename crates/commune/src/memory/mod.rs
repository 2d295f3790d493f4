//! Core memory types

pub mod types;

pub use types::{
    AccessLevel, AggregateStats, CompressionAlgorithm, MemoryEntry, SharedGrant, TenantStats,
};
