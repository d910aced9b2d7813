use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::ollama::OllamaEmbeddingClient;
use crate::index::VectorIndex;
use crate::indexer::IndexBuilder;
use crate::loader;
use crate::retriever::Retriever;
use crate::synthesis::ollama::OllamaGenerationClient;
use crate::synthesis::{Answer, AnswerSynthesizer};
use crate::tickets::{JsonFileTicketStore, PromptClassifier, TicketResolver};
use crate::{RagError, Result};

/// One saved query/answer exchange in the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub query: String,
    pub answer: String,
    pub citations: Vec<String>,
    pub grounded: bool,
}

/// Build or update the vector index from a document directory.
#[inline]
pub async fn build_index(config: &Config, docs_dir: &Path, rebuild: bool) -> Result<()> {
    let paths = loader::find_documents(docs_dir)?;
    if paths.is_empty() {
        return Err(RagError::Load(format!(
            "no supported documents found under {}",
            docs_dir.display()
        )));
    }

    let embeddings = Arc::new(OllamaEmbeddingClient::new(config)?);
    let index_path = config.index_path();

    let index = if rebuild || !index_path.exists() {
        Arc::new(VectorIndex::new(
            config.embedding.dimension as usize,
            config.retrieval.metric,
        ))
    } else {
        Arc::new(open_index(config)?)
    };

    let builder = IndexBuilder::new(
        Arc::clone(&embeddings) as _,
        Arc::clone(&index),
        config.chunking,
    )
    .with_concurrency(config.resolver.worker_count);

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!(
        "Indexing {} documents from {}",
        paths.len(),
        docs_dir.display()
    ));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let stats = builder.ingest_directory(docs_dir, rebuild).await?;
    index.persist(&index_path)?;

    spinner.finish_and_clear();

    println!("{} Index written to {}", style("✓").green(), index_path.display());
    println!("  Documents indexed: {}", stats.documents_indexed);
    println!("  Chunks indexed: {}", stats.chunks_indexed);
    if stats.chunks_removed > 0 {
        println!("  Superseded chunks removed: {}", stats.chunks_removed);
    }
    if stats.documents_failed > 0 {
        println!(
            "  {} {} documents failed to load (see log)",
            style("!").yellow(),
            stats.documents_failed
        );
    }

    Ok(())
}

/// Answer a one-off query against the persisted index.
#[inline]
pub async fn query(config: &Config, text: &str) -> Result<()> {
    let index = Arc::new(open_index(config)?);
    let embeddings = Arc::new(OllamaEmbeddingClient::new(config)?);
    let generator = Arc::new(OllamaGenerationClient::new(config)?);

    let retriever = Retriever::new(Arc::clone(&embeddings) as _, Arc::clone(&index));
    let synthesizer = AnswerSynthesizer::new(
        Arc::clone(&generator) as _,
        index,
        config.retrieval.context_budget_tokens,
    );

    info!("New query: {}", text);

    let results = retriever
        .retrieve(
            text,
            config.retrieval.top_k,
            config.retrieval.score_threshold,
        )
        .await?;

    let answer = synthesizer.answer(text, &results).await?;

    println!("{}", answer.text.trim());

    if answer.grounded {
        let sources = answer
            .citations
            .iter()
            .map(|c| c.source_uri.as_str())
            .unique()
            .sorted()
            .join(", ");
        println!();
        println!("{} {}", style("Sources:").bold(), sources);
    } else {
        println!();
        println!(
            "{} answer is not based on indexed documentation",
            style("Note:").yellow().bold()
        );
    }

    if let Err(e) = save_history(&config.history_path(), text, &answer) {
        warn!("Failed to save query history: {}", e);
    }

    Ok(())
}

/// Process open tickets from the ticket file through the resolver.
#[inline]
pub async fn resolve_tickets(
    config: &Config,
    tickets_path: Option<PathBuf>,
    limit: usize,
) -> Result<()> {
    let tickets_path = tickets_path.unwrap_or_else(|| config.base_dir.join("tickets.json"));

    let index = Arc::new(open_index(config)?);
    let embeddings = Arc::new(OllamaEmbeddingClient::new(config)?);
    let generator = Arc::new(OllamaGenerationClient::new(config)?);

    let store = Arc::new(JsonFileTicketStore::new(tickets_path.clone()));
    let retriever = Arc::new(Retriever::new(
        Arc::clone(&embeddings) as _,
        Arc::clone(&index),
    ));
    let synthesizer = Arc::new(AnswerSynthesizer::new(
        Arc::clone(&generator) as _,
        index,
        config.retrieval.context_budget_tokens,
    ));
    let classifier = Arc::new(PromptClassifier::new(
        Arc::clone(&generator) as _,
        config.resolver.categories.clone(),
    ));

    let resolver = Arc::new(TicketResolver::new(
        config,
        store,
        retriever,
        synthesizer,
        classifier,
    ));

    let stats = resolver.process_all(limit).await?;

    println!(
        "{} Processed {} tickets from {}",
        style("✓").green(),
        stats.fetched,
        tickets_path.display()
    );
    println!("  Resolved: {}", stats.resolved);
    println!("  Failed: {}", stats.failed);
    if stats.skipped > 0 {
        println!("  Skipped (already settled): {}", stats.skipped);
    }
    if stats.conflicts > 0 {
        println!("  Conflicts (concurrent delivery): {}", stats.conflicts);
    }

    Ok(())
}

/// Show index and history status.
#[inline]
pub fn show_status(config: &Config) -> Result<()> {
    println!("Config directory: {}", config.base_dir.display());
    println!("Embedding model: {}", config.embedding.model);
    println!("Generation model: {}", config.generation.model);
    println!();

    let index_path = config.index_path();
    if index_path.exists() {
        let index = open_index(config)?;
        println!("Index: {}", index_path.display());
        println!("  Dimension: {}", index.dimension());
        println!("  Metric: {}", index.metric());
        println!("  Documents: {}", index.document_ids().len());
        println!("  Live chunks: {}", index.live_count());
    } else {
        println!(
            "Index: not built yet (run `ragdesk build <docs-dir> --rebuild`)"
        );
    }

    let history_path = config.history_path();
    if history_path.exists() {
        let records = read_history(&history_path);
        println!();
        println!("History: {} queries in {}", records.len(), history_path.display());
    }

    Ok(())
}

/// Print the active configuration as TOML.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let content =
        toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("# {}", config.config_file_path().display());
    print!("{}", content);
    Ok(())
}

/// Open the persisted index, checking dimension and metric eagerly.
fn open_index(config: &Config) -> Result<VectorIndex> {
    let path = config.index_path();
    if !path.exists() {
        return Err(RagError::CorruptIndex(format!(
            "no index snapshot at {}",
            path.display()
        )));
    }

    VectorIndex::load(
        &path,
        config.embedding.dimension as usize,
        config.retrieval.metric,
    )
}

/// Append a query/answer record to the JSON history log. A corrupt existing
/// file is replaced rather than aborting the query.
fn save_history(path: &Path, query: &str, answer: &Answer) -> Result<()> {
    let mut records = read_history(path);

    records.push(HistoryRecord {
        timestamp: Utc::now().to_rfc3339(),
        query: query.to_string(),
        answer: answer.text.clone(),
        citations: answer
            .citations
            .iter()
            .map(|c| c.source_uri.clone())
            .collect(),
        grounded: answer.grounded,
    });

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(&records)
        .context("Failed to serialize query history")?;
    std::fs::write(path, json)?;

    Ok(())
}

fn read_history(path: &Path) -> Vec<HistoryRecord> {
    if !path.exists() {
        return Vec::new();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("History file {} is corrupt ({}); starting fresh", path.display(), e);
            Vec::new()
        }),
        Err(e) => {
            warn!("Failed to read history file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
