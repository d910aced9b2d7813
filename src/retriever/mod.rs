// Retriever module
// Embeds a query and returns the top-k most relevant chunks with scores


use std::sync::Arc;

use tracing::debug;

use crate::Result;
use crate::embeddings::EmbeddingProvider;
use crate::index::VectorIndex;

/// A scored, ranked retrieval hit. Ephemeral; produced per query and never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub score: f32,
    pub rank: usize,
}

pub struct Retriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    #[inline]
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, index: Arc<VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Retrieve up to `k` chunks scoring at or above `score_threshold` for the
    /// query, best first. An empty result means no relevant context exists;
    /// callers must treat that as a valid outcome, not a failure. An index
    /// with no live entries surfaces as `EmptyIndex`.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>> {
        let query_vector = self.embeddings.embed(query).await?;
        let hits = self.index.search(&query_vector, k)?;

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|hit| hit.score >= score_threshold)
            .take(k)
            .enumerate()
            .map(|(rank, hit)| RetrievalResult {
                chunk_id: hit.chunk_id,
                score: hit.score,
                rank,
            })
            .collect();

        debug!(
            "Retrieved {} chunks above threshold {} for query ({} chars)",
            results.len(),
            score_threshold,
            query.len()
        );

        Ok(results)
    }
}
