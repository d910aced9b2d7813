use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::index::SimilarityMetric;

/// Deterministic embedder: hashes each text into a unit vector, counting calls.
struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let sum: u32 = text.bytes().map(u32::from).sum();
        let x = f64::from(sum % 97) as f32;
        let y = f64::from(sum % 89) as f32;
        let norm = (x * x + y * y).sqrt().max(1.0);
        vec![x / norm, y / norm]
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

fn builder_with_index() -> (IndexBuilder, Arc<VectorIndex>) {
    let index = Arc::new(VectorIndex::new(2, SimilarityMetric::Cosine));
    let builder = IndexBuilder::new(
        Arc::new(HashEmbedder::new()),
        Arc::clone(&index),
        ChunkingConfig {
            max_tokens: 8,
            overlap_tokens: 2,
        },
    );
    (builder, index)
}

fn write_corpus(dir: &TempDir) {
    std::fs::write(
        dir.path().join("warranty.txt"),
        "cracked screens are replaced under warranty within thirty days of purchase",
    )
    .expect("should write");
    std::fs::write(
        dir.path().join("billing.txt"),
        "invoices are issued monthly and refunds take five business days to process",
    )
    .expect("should write");
}

#[tokio::test]
async fn rebuild_indexes_all_documents() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_corpus(&temp_dir);

    let (builder, index) = builder_with_index();
    let stats = builder
        .ingest_directory(temp_dir.path(), true)
        .await
        .expect("should ingest");

    assert_eq!(stats.documents_indexed, 2);
    assert_eq!(stats.documents_failed, 0);
    assert!(stats.chunks_indexed >= 2);
    assert_eq!(index.live_count(), stats.chunks_indexed);
    assert_eq!(index.document_ids().len(), 2);
}

#[tokio::test]
async fn reingesting_identical_bytes_does_not_duplicate() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_corpus(&temp_dir);

    let (builder, index) = builder_with_index();
    builder
        .ingest_directory(temp_dir.path(), true)
        .await
        .expect("should ingest");
    let count_after_first = index.live_count();

    // Incremental pass over unchanged bytes upserts onto the same chunk ids.
    let stats = builder
        .ingest_directory(temp_dir.path(), false)
        .await
        .expect("should ingest");

    assert_eq!(index.live_count(), count_after_first);
    assert_eq!(stats.chunks_removed, 0);
}

#[tokio::test]
async fn changed_document_supersedes_prior_version() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_corpus(&temp_dir);

    let (builder, index) = builder_with_index();
    builder
        .ingest_directory(temp_dir.path(), true)
        .await
        .expect("should ingest");

    let old_ids = index.document_ids();

    std::fs::write(
        temp_dir.path().join("warranty.txt"),
        "the warranty policy has been rewritten entirely",
    )
    .expect("should write");

    let stats = builder
        .ingest_directory(temp_dir.path(), false)
        .await
        .expect("should ingest");

    assert!(stats.chunks_removed > 0, "old version is tombstoned");

    let new_ids = index.document_ids();
    assert_eq!(new_ids.len(), 2);
    assert_ne!(old_ids, new_ids);
}

#[tokio::test]
async fn unreadable_file_is_skipped_not_fatal() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_corpus(&temp_dir);
    // A .pdf that is not a PDF fails extraction but only for that file.
    std::fs::write(temp_dir.path().join("broken.pdf"), "not a pdf").expect("should write");

    let (builder, _index) = builder_with_index();
    let stats = builder
        .ingest_directory(temp_dir.path(), true)
        .await
        .expect("should ingest");

    assert_eq!(stats.documents_indexed, 2);
    assert_eq!(stats.documents_failed, 1);
}

#[tokio::test]
async fn empty_directory_rebuild_yields_empty_index() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let (builder, index) = builder_with_index();
    let stats = builder
        .ingest_directory(temp_dir.path(), true)
        .await
        .expect("should ingest");

    assert_eq!(stats.documents_indexed, 0);
    assert_eq!(index.live_count(), 0);
}

#[tokio::test]
async fn chunk_sequence_is_preserved_within_documents() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let long_text = (0..50)
        .map(|i| format!("sentence{}", i))
        .collect::<Vec<_>>()
        .join(" ");
    std::fs::write(temp_dir.path().join("long.txt"), long_text).expect("should write");

    let (builder, index) = builder_with_index();
    builder
        .ingest_directory(temp_dir.path(), true)
        .await
        .expect("should ingest");

    let document_id = index.document_ids().pop().expect("one document");
    let chunk_ids = index.chunk_ids_for_document(&document_id);
    assert!(chunk_ids.len() > 1);

    for (expected_seq, chunk_id) in chunk_ids.iter().enumerate() {
        let entry = index.get(chunk_id).expect("entry exists");
        assert_eq!(entry.metadata.sequence_index, expected_seq);
    }
}
