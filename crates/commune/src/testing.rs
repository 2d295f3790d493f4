//! Test utilities for commune - mock collaborators
//!
//! Deterministic, dependency-free stand-ins for the external embedding
//! provider and vector index, used by unit and integration tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::provider::{EmbeddingProvider, ProviderError, VectorIndex};

/// Embedding dimension used by the mocks
pub const MOCK_EMBEDDING_DIMENSIONS: usize = 384;

/// Mock embedding provider for fast tests that don't need real ML.
/// Produces deterministic 384-dimensional vectors based on content hash.
#[derive(Debug, Clone, Default)]
pub struct MockEmbeddingProvider;

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    /// Generate a deterministic "embedding" from bytes using hashing.
    /// Returns a 384-dim vector in range [-1, 1].
    pub fn embed_sync(&self, content: &[u8]) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let seed = hasher.finish();

        (0..MOCK_EMBEDDING_DIMENSIONS)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, content: &[u8]) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_sync(content))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Embedding provider that always fails, for exercising the
/// proceed-without-embedding branch.
#[derive(Debug, Clone, Default)]
pub struct FailingEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for FailingEmbeddingProvider {
    async fn embed(&self, _content: &[u8]) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unavailable("mock outage".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Embedding provider that sleeps past any reasonable deadline, for
/// exercising the embedding-timeout branch.
#[derive(Debug, Clone)]
pub struct SlowEmbeddingProvider {
    pub delay: Duration,
}

impl SlowEmbeddingProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbeddingProvider {
    async fn embed(&self, content: &[u8]) -> Result<Vec<f32>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(MockEmbeddingProvider::new().embed_sync(content))
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Vector index that records every call, so tests can assert on
/// index/remove traffic without a real similarity engine.
#[derive(Debug, Default)]
pub struct RecordingVectorIndex {
    vectors: DashMap<Uuid, Vec<f32>>,
}

impl RecordingVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, entry_id: Uuid) -> bool {
        self.vectors.contains_key(&entry_id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[async_trait]
impl VectorIndex for RecordingVectorIndex {
    async fn index(&self, entry_id: Uuid, vector: &[f32]) -> Result<(), ProviderError> {
        self.vectors.insert(entry_id, vector.to_vec());
        Ok(())
    }

    async fn remove(&self, entry_id: Uuid) -> Result<(), ProviderError> {
        self.vectors.remove(&entry_id);
        Ok(())
    }

    async fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<Uuid>, ProviderError> {
        // Ranking is not this crate's concern; return any k known ids
        Ok(self.vectors.iter().take(k).map(|e| *e.key()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_embedding_is_deterministic() {
        let provider = MockEmbeddingProvider::new();
        assert_eq!(provider.embed_sync(b"hello"), provider.embed_sync(b"hello"));
    }

    #[test]
    fn mock_embedding_has_correct_dimensions() {
        let provider = MockEmbeddingProvider::new();
        assert_eq!(
            provider.embed_sync(b"test").len(),
            MOCK_EMBEDDING_DIMENSIONS
        );
    }

    #[test]
    fn mock_embedding_values_in_range() {
        let provider = MockEmbeddingProvider::new();
        for value in provider.embed_sync(b"range check") {
            assert!((-1.0..=1.0).contains(&value));
        }
    }

    #[tokio::test]
    async fn recording_index_tracks_membership() {
        let index = RecordingVectorIndex::new();
        let id = Uuid::new_v4();

        index.index(id, &[0.1, 0.2]).await.unwrap();
        assert!(index.contains(id));

        index.remove(id).await.unwrap();
        assert!(!index.contains(id));
    }
}
