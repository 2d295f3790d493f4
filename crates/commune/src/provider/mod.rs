//! External collaborator seams
//!
//! The embedding provider and the vector similarity index live outside
//! this crate; both are consumed through narrow async traits. Either
//! collaborator failing is non-fatal: embeddings are best-effort
//! enrichment and index maintenance is fire-and-forget with logging.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by an external collaborator
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider reachable but the call failed
    #[error("provider call failed: {0}")]
    Failed(String),
    /// Provider did not answer within its time budget
    #[error("provider timed out")]
    Timeout,
    /// Provider is not reachable at all
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Produces a fixed-length vector for a content blob.
///
/// Called during `store`, before the per-tenant lock is taken; a slow
/// or failed call never blocks other tenants.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a content blob into a fixed-length vector
    async fn embed(&self, content: &[u8]) -> Result<Vec<f32>, ProviderError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Vector similarity index maintained alongside the store.
///
/// Insertion and removal are best-effort; query ranking quality is the
/// index's concern, not this crate's.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Register an entry's embedding with the index
    async fn index(&self, entry_id: Uuid, vector: &[f32]) -> Result<(), ProviderError>;

    /// Remove an entry from the index
    async fn remove(&self, entry_id: Uuid) -> Result<(), ProviderError>;

    /// Ranked entry ids most similar to the query vector
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Uuid>, ProviderError>;
}
