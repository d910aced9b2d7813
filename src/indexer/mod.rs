// Indexer module
// Drives loader -> chunker -> embeddings -> vector index for a document corpus

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::Result;
use crate::chunking;
use crate::config::ChunkingConfig;
use crate::embeddings::EmbeddingProvider;
use crate::index::{EntryMetadata, IndexEntry, VectorIndex};
use crate::loader::{self, Document};

const DEFAULT_CONCURRENCY: usize = 4;

/// Statistics about an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub chunks_indexed: usize,
    pub chunks_removed: usize,
}

/// Builds and updates the vector index from a document directory.
///
/// Documents embed in parallel under a bounded worker pool; chunk order within
/// a document is preserved because `embed_batch` is order-preserving and each
/// document is handled by a single worker.
pub struct IndexBuilder {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    chunking: ChunkingConfig,
    concurrency: usize,
}

impl IndexBuilder {
    #[inline]
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embeddings,
            index,
            chunking,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    #[inline]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingest every supported document under `dir`.
    ///
    /// With `rebuild` the index is replaced atomically once all entries are
    /// built (searches keep hitting the old snapshot until the swap). Without
    /// it, documents upsert incrementally: unchanged documents re-index onto
    /// the same chunk ids, and chunks of a superseded document version are
    /// tombstoned.
    #[inline]
    pub async fn ingest_directory(&self, dir: &Path, rebuild: bool) -> Result<IngestionStats> {
        let paths = loader::find_documents(dir)?;
        info!("Found {} documents under {}", paths.len(), dir.display());

        let mut stats = IngestionStats::default();
        let mut all_entries = Vec::new();

        let mut outcomes = futures::stream::iter(
            paths
                .iter()
                .map(|path| async move { (path, self.ingest_path(path).await) }),
        )
        .buffer_unordered(self.concurrency);

        while let Some((path, outcome)) = outcomes.next().await {
            match outcome {
                Ok((document, entries)) => {
                    stats.documents_indexed += 1;
                    stats.chunks_indexed += entries.len();

                    if rebuild {
                        all_entries.extend(entries);
                    } else {
                        stats.chunks_removed +=
                            self.remove_superseded(&document.source_uri, &document.id);
                        self.index.insert(entries)?;
                    }
                }
                Err(e) => {
                    // A single unreadable file does not abort the build; model
                    // endpoint failures do.
                    if matches!(e, crate::RagError::Embedding(_)) {
                        return Err(e);
                    }
                    warn!("Skipping {}: {}", path.display(), e);
                    stats.documents_failed += 1;
                }
            }
        }

        if rebuild {
            self.index.rebuild(all_entries)?;
        }

        info!(
            "Ingestion complete: {} documents, {} chunks indexed, {} failed",
            stats.documents_indexed, stats.chunks_indexed, stats.documents_failed
        );

        Ok(stats)
    }

    /// Load, chunk, and embed a single file into index entries.
    async fn ingest_path(&self, path: &Path) -> Result<(Document, Vec<IndexEntry>)> {
        let document = loader::load(path)?;
        let entries = self.ingest_document(&document).await?;
        Ok((document, entries))
    }

    /// Chunk and embed one document, preserving chunk order.
    #[inline]
    pub async fn ingest_document(&self, document: &Document) -> Result<Vec<IndexEntry>> {
        let chunks = chunking::chunk(
            document,
            self.chunking.max_tokens,
            self.chunking.overlap_tokens,
        )?;

        if chunks.is_empty() {
            debug!("Document {} has no content to index", document.id);
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let created_at = Utc::now().to_rfc3339();
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_id: chunk.id,
                vector,
                metadata: EntryMetadata {
                    document_id: chunk.document_id,
                    source_uri: document.source_uri.clone(),
                    sequence_index: chunk.sequence_index,
                    text: chunk.text,
                    token_count: chunk.token_count,
                    created_at: created_at.clone(),
                },
            })
            .collect();

        Ok(entries)
    }

    /// Tombstone chunks belonging to an older version of the same source.
    fn remove_superseded(&self, source_uri: &str, current_document_id: &str) -> usize {
        let stale: Vec<String> = self
            .index
            .chunk_ids_for_source(source_uri)
            .into_iter()
            .filter(|(_, document_id)| document_id != current_document_id)
            .map(|(chunk_id, _)| chunk_id)
            .collect();

        if !stale.is_empty() {
            debug!(
                "Removing {} superseded chunks for {}",
                stale.len(),
                source_uri
            );
            self.index.remove(&stale);
        }

        stale.len()
    }
}
