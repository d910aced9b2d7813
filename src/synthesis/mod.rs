// Answer synthesis module
// Builds augmented prompts from retrieved chunks and invokes a generation model


pub mod ollama;

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::chunking::chunk_id;
use crate::index::VectorIndex;
use crate::retriever::RetrievalResult;

/// Invokes a generation model with a fully assembled prompt.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub source_uri: String,
}

/// A synthesized answer. `grounded` is false when no retrieved context was
/// available, so consumers can apply a different confidence policy instead of
/// mistaking a model-only answer for a documented one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub grounded: bool,
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn GenerationProvider>,
    index: Arc<VectorIndex>,
    /// Token budget for the assembled context, including neighbor expansion.
    context_budget_tokens: usize,
}

impl AnswerSynthesizer {
    #[inline]
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        index: Arc<VectorIndex>,
        context_budget_tokens: usize,
    ) -> Self {
        Self {
            generator,
            index,
            context_budget_tokens,
        }
    }

    /// Build an augmented prompt from the retrieval results (in rank order,
    /// each expanded with its neighboring chunks from the same document up to
    /// the context budget), invoke the generation model, and return the answer
    /// with citations.
    #[inline]
    pub async fn answer(&self, query: &str, results: &[RetrievalResult]) -> Result<Answer> {
        let grounded = !results.is_empty();
        let (context, citations) = self.assemble_context(results);

        let prompt = if grounded {
            format!(
                "You are a concise support assistant. Answer the question using only the \
                 provided context and cite sources. If the context does not contain the \
                 answer, say so.\n\nContext:\n{}\nQuestion:\n{}",
                context, query
            )
        } else {
            debug!("No retrieval results; synthesizing ungrounded answer");
            format!(
                "You are a concise support assistant. No reference material matched this \
                 question; answer from general knowledge and make clear the answer is not \
                 based on documentation.\n\nQuestion:\n{}",
                query
            )
        };

        let text = self.generator.generate(&prompt).await?;

        Ok(Answer {
            text,
            citations,
            grounded,
        })
    }

    /// Concatenate retrieved chunk texts in rank order, pulling in the
    /// previous/next chunk of the same document while the token budget allows.
    /// Returns the context block and deduplicated citations in rank order.
    fn assemble_context(&self, results: &[RetrievalResult]) -> (String, Vec<Citation>) {
        let mut context = String::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut included: BTreeSet<String> = BTreeSet::new();
        let mut budget = self.context_budget_tokens;

        for (position, result) in results.iter().enumerate() {
            let Some(entry) = self.index.get(&result.chunk_id) else {
                continue;
            };

            let mut block_ids = vec![result.chunk_id.clone()];
            let document_id = entry.metadata.document_id.clone();
            let sequence_index = entry.metadata.sequence_index;

            // Neighbors in sequence order: previous first, then next.
            if sequence_index > 0 {
                block_ids.insert(0, chunk_id(&document_id, sequence_index - 1));
            }
            block_ids.push(chunk_id(&document_id, sequence_index + 1));

            let mut block = String::new();
            for id in block_ids {
                if included.contains(&id) {
                    continue;
                }
                let Some(neighbor) = self.index.get(&id) else {
                    continue;
                };

                // The ranked chunk itself is always included; neighbors only
                // while they fit the budget.
                if id != result.chunk_id && neighbor.metadata.token_count > budget {
                    continue;
                }

                budget = budget.saturating_sub(neighbor.metadata.token_count);
                included.insert(id);
                if !block.is_empty() {
                    block.push('\n');
                }
                block.push_str(neighbor.metadata.text.trim());
            }

            if block.is_empty() {
                continue;
            }

            let _ = writeln!(
                context,
                "[{}] (source: {})\n{}\n",
                position + 1,
                entry.metadata.source_uri,
                block
            );

            if !citations.iter().any(|c| c.document_id == document_id) {
                citations.push(Citation {
                    document_id,
                    source_uri: entry.metadata.source_uri.clone(),
                });
            }
        }

        (context, citations)
    }
}
