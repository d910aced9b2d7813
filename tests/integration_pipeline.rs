#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end pipeline tests with an in-process deterministic embedder:
// load -> chunk -> embed -> index -> persist -> retrieve -> synthesize

use std::sync::Arc;

use async_trait::async_trait;
use ragdesk::Result;
use ragdesk::config::ChunkingConfig;
use ragdesk::embeddings::EmbeddingProvider;
use ragdesk::index::{SimilarityMetric, VectorIndex};
use ragdesk::indexer::IndexBuilder;
use ragdesk::retriever::Retriever;
use ragdesk::synthesis::{AnswerSynthesizer, GenerationProvider};
use tempfile::TempDir;

const DIMENSION: usize = 8;

/// Embeds text as a bag-of-words histogram over a tiny vocabulary, so texts
/// sharing words land close together. Deterministic across calls.
struct VocabEmbedder;

const VOCAB: [&str; 8] = [
    "screen", "cracked", "warranty", "refund", "invoice", "billing", "password", "login",
];

fn vocab_vector(text: &str) -> Vec<f32> {
    let lowered = text.to_lowercase();
    let mut vector = vec![0.0_f32; DIMENSION];
    for word in lowered.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if let Some(pos) = VOCAB.iter().position(|v| *v == word) {
            vector[pos] += 1.0;
        }
    }
    // Texts with no vocabulary hits embed on a neutral axis.
    if vector.iter().all(|v| *v == 0.0) {
        vector[DIMENSION - 1] = 0.001;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vocab_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

struct EchoGenerator;

#[async_trait]
impl GenerationProvider for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(format!("echo:{}", prompt.len()))
    }
}

fn write_corpus(dir: &TempDir) {
    std::fs::write(
        dir.path().join("warranty.md"),
        "# Warranty\n\nA cracked screen is replaced under warranty at no cost.\n",
    )
    .expect("can write corpus");
    std::fs::write(
        dir.path().join("billing.txt"),
        "Every invoice is issued monthly. A billing refund takes five days.",
    )
    .expect("can write corpus");
    std::fs::write(
        dir.path().join("account.txt"),
        "Reset your password from the login page.",
    )
    .expect("can write corpus");
}

async fn build_pipeline(docs: &TempDir) -> (Arc<VectorIndex>, Retriever) {
    let index = Arc::new(VectorIndex::new(DIMENSION, SimilarityMetric::Cosine));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(VocabEmbedder);

    let builder = IndexBuilder::new(
        Arc::clone(&embedder),
        Arc::clone(&index),
        ChunkingConfig {
            max_tokens: 64,
            overlap_tokens: 8,
        },
    );

    builder
        .ingest_directory(docs.path(), true)
        .await
        .expect("ingestion succeeds");

    let retriever = Retriever::new(embedder, Arc::clone(&index));
    (index, retriever)
}

#[tokio::test]
async fn query_retrieves_the_relevant_document() {
    let docs = TempDir::new().expect("can create temp dir");
    write_corpus(&docs);

    let (index, retriever) = build_pipeline(&docs).await;
    assert_eq!(index.document_ids().len(), 3);

    let results = retriever
        .retrieve("my screen is cracked", 3, 0.1)
        .await
        .expect("retrieval succeeds");

    assert!(!results.is_empty());
    let top = index
        .get(&results[0].chunk_id)
        .expect("top chunk is in the index");
    assert_eq!(top.metadata.source_uri, docs.path().join("warranty.md").display().to_string());
}

#[tokio::test]
async fn persisted_index_answers_identically() {
    let docs = TempDir::new().expect("can create temp dir");
    write_corpus(&docs);
    let state = TempDir::new().expect("can create temp dir");
    let snapshot = state.path().join("index.json");

    let (index, retriever) = build_pipeline(&docs).await;
    index.persist(&snapshot).expect("persist succeeds");

    let reloaded = Arc::new(
        VectorIndex::load(&snapshot, DIMENSION, SimilarityMetric::Cosine)
            .expect("load succeeds"),
    );
    let reloaded_retriever = Retriever::new(Arc::new(VocabEmbedder), Arc::clone(&reloaded));

    let before = retriever
        .retrieve("billing refund for my invoice", 5, 0.0)
        .await
        .expect("retrieval succeeds");
    let after = reloaded_retriever
        .retrieve("billing refund for my invoice", 5, 0.0)
        .await
        .expect("retrieval succeeds");

    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.chunk_id, a.chunk_id);
        assert!((b.score - a.score).abs() < 1e-6);
    }
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let docs = TempDir::new().expect("can create temp dir");
    write_corpus(&docs);

    let index = Arc::new(VectorIndex::new(DIMENSION, SimilarityMetric::Cosine));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(VocabEmbedder);
    let builder = IndexBuilder::new(
        Arc::clone(&embedder),
        Arc::clone(&index),
        ChunkingConfig {
            max_tokens: 64,
            overlap_tokens: 8,
        },
    );

    builder
        .ingest_directory(docs.path(), true)
        .await
        .expect("ingestion succeeds");
    let first_count = index.live_count();
    let first_documents = index.document_ids();

    // Same bytes, incremental pass: same document ids, no duplicate chunks.
    builder
        .ingest_directory(docs.path(), false)
        .await
        .expect("ingestion succeeds");

    assert_eq!(index.live_count(), first_count);
    assert_eq!(index.document_ids(), first_documents);
}

#[tokio::test]
async fn synthesizer_grounds_answers_in_retrieved_chunks() {
    let docs = TempDir::new().expect("can create temp dir");
    write_corpus(&docs);

    let (index, retriever) = build_pipeline(&docs).await;
    let synthesizer = AnswerSynthesizer::new(Arc::new(EchoGenerator), index, 512);

    let results = retriever
        .retrieve("cracked screen warranty", 3, 0.1)
        .await
        .expect("retrieval succeeds");
    let answer = synthesizer
        .answer("cracked screen warranty", &results)
        .await
        .expect("synthesis succeeds");

    assert!(answer.grounded);
    assert!(!answer.citations.is_empty());
    assert!(answer.citations[0].source_uri.ends_with("warranty.md"));

    // Nothing relevant: grounded is false and that is not an error.
    let empty = retriever
        .retrieve("completely unrelated gibberish", 3, 0.9)
        .await
        .expect("retrieval succeeds");
    assert!(empty.is_empty());

    let ungrounded = synthesizer
        .answer("completely unrelated gibberish", &empty)
        .await
        .expect("synthesis succeeds");
    assert!(!ungrounded.grounded);
    assert!(ungrounded.citations.is_empty());
}
