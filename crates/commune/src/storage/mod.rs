pub mod eviction;
pub mod snapshot;
pub mod store;

pub use eviction::{EvictionOutcome, QuotaEvictor};
pub use snapshot::{SnapshotRecord, TenantSnapshot};
pub use store::MemoryStore;
