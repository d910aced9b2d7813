// Document loading module
// Normalizes heterogeneous source files into text-plus-metadata documents


use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use pulldown_cmark::{Event, Options, Parser, TagEnd};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{RagError, Result};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_PDF: &str = "application/pdf";

/// A normalized source document. Immutable once loaded; re-loading the same
/// bytes yields the same id, re-loading changed bytes yields a new document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Content-addressed id derived from `content_hash`.
    pub id: String,
    pub source_uri: String,
    pub raw_text: String,
    /// SHA-256 of the raw input bytes, hex encoded.
    pub content_hash: String,
    pub mime_type: String,
}

/// Load a document from a filesystem path, detecting the format by extension.
#[inline]
pub fn load(path: &Path) -> Result<Document> {
    let mime = mime_for_path(path)?;
    let bytes = std::fs::read(path)
        .map_err(|e| RagError::Load(format!("failed to read {}: {}", path.display(), e)))?;

    load_bytes(&bytes, mime, &path.display().to_string())
}

/// Load a document from raw bytes with an explicit mime type.
#[inline]
pub fn load_bytes(bytes: &[u8], mime_type: &str, source_uri: &str) -> Result<Document> {
    let raw_text = match mime_type {
        MIME_TEXT | MIME_CSV => decode_utf8(bytes, source_uri)?,
        MIME_MARKDOWN => flatten_markdown(&decode_utf8(bytes, source_uri)?),
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| RagError::Load(format!("PDF extraction failed for {}: {}", source_uri, e)))?,
        other => return Err(RagError::UnsupportedFormat(other.to_string())),
    };

    let content_hash = hash_bytes(bytes);
    let id = format!("doc-{}", &content_hash[..16]);

    debug!(
        "Loaded document {} from {} ({} chars, {})",
        id,
        source_uri,
        raw_text.len(),
        mime_type
    );

    Ok(Document {
        id,
        source_uri: source_uri.to_string(),
        raw_text,
        content_hash,
        mime_type: mime_type.to_string(),
    })
}

/// Map a file extension to a supported mime type.
#[inline]
pub fn mime_for_path(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" => Ok(MIME_TEXT),
        "md" | "markdown" => Ok(MIME_MARKDOWN),
        "csv" => Ok(MIME_CSV),
        "pdf" => Ok(MIME_PDF),
        _ => Err(RagError::UnsupportedFormat(format!(
            "{} (from {})",
            ext,
            path.display()
        ))),
    }
}

/// Find all supported documents under a directory, recursively, in sorted order
/// so repeated scans visit files deterministically.
#[inline]
pub fn find_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_documents(dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_documents(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| RagError::Load(format!("failed to scan {}: {}", dir.display(), e)))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| RagError::Load(format!("failed to scan {}: {}", dir.display(), e)))?;
        let path = entry.path();

        if path.is_dir() {
            collect_documents(&path, found)?;
        } else if mime_for_path(&path).is_ok() {
            found.push(path);
        } else {
            warn!("Skipping unsupported file: {}", path.display());
        }
    }

    Ok(())
}

fn decode_utf8(bytes: &[u8], source_uri: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RagError::Load(format!("{} is not valid UTF-8: {}", source_uri, e)))
}

/// Flatten markdown to plain text, keeping block structure as blank lines.
fn flatten_markdown(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::empty());
    let mut text = String::with_capacity(markdown.len());

    for event in parser {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_),
            ) => {
                let _ = writeln!(text);
                let _ = writeln!(text);
            }
            _ => {}
        }
    }

    text.trim_end().to_string()
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
