// Chunking module
// Splits normalized documents into overlapping token windows sized for embedding


use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::Document;
use crate::{RagError, Result};

/// A bounded text window derived from a document, the unit of embedding and
/// retrieval. Owned by its parent document; `sequence_index` defines a stable
/// total order within the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence_index: usize,
    pub text: String,
    /// Byte span into the document's `raw_text`.
    pub char_span: (usize, usize),
    pub token_count: usize,
}

/// Deterministic chunk id for a document position.
#[inline]
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    // Zero padding keeps lexicographic chunk-id order aligned with sequence order.
    format!("{}:{:05}", document_id, sequence_index)
}

/// Split a document into overlapping windows of `max_tokens` tokens, advancing
/// `max_tokens - overlap_tokens` tokens per window.
///
/// Windows cover the whole document with no gaps; consecutive windows overlap
/// by exactly `overlap_tokens` tokens; the final window may be shorter but is
/// never empty. A document shorter than `max_tokens` yields exactly one chunk;
/// a document with no non-whitespace content yields none.
#[inline]
pub fn chunk(document: &Document, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<Chunk>> {
    let chunks: Vec<Chunk> = windows(document, max_tokens, overlap_tokens)?.collect();

    debug!(
        "Chunked document {} into {} chunks (max {} tokens, overlap {})",
        document.id,
        chunks.len(),
        max_tokens,
        overlap_tokens
    );

    Ok(chunks)
}

/// Lazy, restartable window iterator over a document. Cloning restarts the
/// sequence from the first window.
#[inline]
pub fn windows(
    document: &Document,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<ChunkWindows<'_>> {
    if max_tokens == 0 {
        return Err(RagError::InvalidConfig(
            "max_tokens must be greater than zero".to_string(),
        ));
    }

    if overlap_tokens >= max_tokens {
        return Err(RagError::InvalidConfig(format!(
            "overlap_tokens ({}) must be less than max_tokens ({})",
            overlap_tokens, max_tokens
        )));
    }

    Ok(ChunkWindows {
        document,
        spans: token_spans(&document.raw_text),
        max_tokens,
        step: max_tokens - overlap_tokens,
        next_window: 0,
        done: false,
    })
}

#[derive(Debug, Clone)]
pub struct ChunkWindows<'a> {
    document: &'a Document,
    spans: Vec<(usize, usize)>,
    max_tokens: usize,
    step: usize,
    next_window: usize,
    done: bool,
}

impl Iterator for ChunkWindows<'_> {
    type Item = Chunk;

    #[inline]
    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let start_token = self.next_window * self.step;
        if start_token >= self.spans.len() {
            self.done = true;
            return None;
        }

        let end_token = (start_token + self.max_tokens).min(self.spans.len());
        if end_token == self.spans.len() {
            // The window that reaches the end of the document is the last one;
            // a further window would only repeat already-covered tokens.
            self.done = true;
        }

        let span_start = self.spans[start_token].0;
        let span_end = self.spans[end_token - 1].1;
        let text = self
            .document
            .raw_text
            .get(span_start..span_end)
            .unwrap_or("")
            .to_string();

        let sequence_index = self.next_window;
        self.next_window += 1;

        Some(Chunk {
            id: chunk_id(&self.document.id, sequence_index),
            document_id: self.document.id.clone(),
            sequence_index,
            text,
            char_span: (span_start, span_end),
            token_count: end_token - start_token,
        })
    }
}

/// Estimate the token count of a text using the whitespace tokenization the
/// chunker itself uses.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Token spans partitioning `[0, text.len())`. A token is a run of
/// non-whitespace plus its trailing whitespace; leading whitespace attaches to
/// the first token so the spans cover the whole text.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut prev_was_whitespace = true;

    for (i, ch) in text.char_indices() {
        if !ch.is_whitespace() && prev_was_whitespace {
            starts.push(i);
        }
        prev_was_whitespace = ch.is_whitespace();
    }

    if starts.is_empty() {
        return Vec::new();
    }

    starts[0] = 0;

    let mut spans = Vec::with_capacity(starts.len());
    for (k, &start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).copied().unwrap_or(text.len());
        spans.push((start, end));
    }

    spans
}
