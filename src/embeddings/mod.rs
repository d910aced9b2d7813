// Embedding provider module
// Maps text chunks to fixed-dimension vectors via an external model endpoint

pub mod ollama;

use async_trait::async_trait;

use crate::Result;

/// Maps text to a fixed-dimension vector. The dimension is fixed at provider
/// construction; `embed_batch` preserves input order. Deterministic for a given
/// model version; an index rebuild is the migration path across model upgrades.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The dimension of every vector this provider produces.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
