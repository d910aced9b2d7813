// Vector index module
// Stores chunk vectors plus metadata and answers nearest-neighbor queries


use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{RagError, Result};

/// Snapshot format version; load rejects anything else.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    Cosine,
    InnerProduct,
}

impl std::fmt::Display for SimilarityMetric {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SimilarityMetric::Cosine => write!(f, "cosine"),
            SimilarityMetric::InnerProduct => write!(f, "inner_product"),
        }
    }
}

/// Metadata stored alongside each vector. After build the index is
/// authoritative for retrieval; the synthesizer reads chunk text and ordering
/// from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub document_id: String,
    pub source_uri: String,
    pub sequence_index: usize,
    pub text: String,
    pub token_count: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// A scored nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    vector: Vec<f32>,
    metadata: EntryMetadata,
    /// Tombstoned entries are invisible to search; compaction happens at rebuild.
    deleted: bool,
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: BTreeMap<String, StoredEntry>,
}

impl Snapshot {
    fn live_count(&self) -> usize {
        self.entries.values().filter(|e| !e.deleted).count()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    dimension: usize,
    metric: SimilarityMetric,
    entries: Vec<IndexEntry>,
}

/// In-memory vector index with copy-on-write snapshots.
///
/// Searches clone the current snapshot handle under a briefly-held read lock,
/// so a search in flight observes one consistent version of the index even
/// while an insert, remove, or rebuild is running. Mutations serialize on a
/// writer lock, build a fresh snapshot, and swap it in; the old snapshot stays
/// servable until the swap.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    metric: SimilarityMetric,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl VectorIndex {
    #[inline]
    pub fn new(dimension: usize, metric: SimilarityMetric) -> Self {
        Self {
            dimension,
            metric,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Number of live (non-tombstoned) entries.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.current().live_count()
    }

    /// Number of tombstoned entries awaiting compaction.
    #[inline]
    pub fn tombstone_count(&self) -> usize {
        let snapshot = self.current();
        snapshot.entries.len() - snapshot.live_count()
    }

    /// Append entries; an existing `chunk_id` is replaced (last write wins),
    /// which makes incremental re-indexing idempotent.
    #[inline]
    pub fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.check_dimension(&entry.vector)?;
        }

        self.mutate(|map| {
            for entry in entries {
                map.insert(
                    entry.chunk_id,
                    StoredEntry {
                        vector: entry.vector,
                        metadata: entry.metadata,
                        deleted: false,
                    },
                );
            }
        });

        Ok(())
    }

    /// Tombstone entries; unknown ids are ignored. Physical removal is
    /// deferred to `rebuild`.
    #[inline]
    pub fn remove(&self, chunk_ids: &[String]) {
        self.mutate(|map| {
            for chunk_id in chunk_ids {
                if let Some(entry) = map.get_mut(chunk_id) {
                    entry.deleted = true;
                }
            }
        });
    }

    /// Atomic full replace. The previous snapshot keeps serving searches until
    /// the new one is fully built; tombstones are compacted away.
    #[inline]
    pub fn rebuild(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.check_dimension(&entry.vector)?;
        }

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut map = BTreeMap::new();
        for entry in entries {
            map.insert(
                entry.chunk_id,
                StoredEntry {
                    vector: entry.vector,
                    metadata: entry.metadata,
                    deleted: false,
                },
            );
        }

        let count = map.len();
        self.swap(Snapshot { entries: map });
        info!("Rebuilt index with {} entries", count);

        Ok(())
    }

    /// K-nearest-neighbor search, ordered by descending score with ties broken
    /// by ascending chunk id for determinism.
    #[inline]
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check_dimension(query_vector)?;

        let snapshot = self.current();
        if snapshot.live_count() == 0 {
            return Err(RagError::EmptyIndex);
        }

        let mut hits: Vec<SearchHit> = snapshot
            .entries
            .iter()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(chunk_id, entry)| SearchHit {
                chunk_id: chunk_id.clone(),
                score: self.score(query_vector, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);

        debug!("Search returned {} of {} live entries", hits.len(), snapshot.live_count());
        Ok(hits)
    }

    /// Fetch a live entry by chunk id.
    #[inline]
    pub fn get(&self, chunk_id: &str) -> Option<IndexEntry> {
        let snapshot = self.current();
        snapshot
            .entries
            .get(chunk_id)
            .filter(|entry| !entry.deleted)
            .map(|entry| IndexEntry {
                chunk_id: chunk_id.to_string(),
                vector: entry.vector.clone(),
                metadata: entry.metadata.clone(),
            })
    }

    /// All live chunk ids belonging to a document, in sequence order.
    #[inline]
    pub fn chunk_ids_for_document(&self, document_id: &str) -> Vec<String> {
        let snapshot = self.current();
        let mut ids: Vec<(usize, String)> = snapshot
            .entries
            .iter()
            .filter(|(_, entry)| !entry.deleted && entry.metadata.document_id == document_id)
            .map(|(chunk_id, entry)| (entry.metadata.sequence_index, chunk_id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Live `(chunk_id, document_id)` pairs for a source URI. Used during
    /// incremental re-indexing to find chunks of a superseded document version.
    #[inline]
    pub fn chunk_ids_for_source(&self, source_uri: &str) -> Vec<(String, String)> {
        let snapshot = self.current();
        snapshot
            .entries
            .iter()
            .filter(|(_, entry)| !entry.deleted && entry.metadata.source_uri == source_uri)
            .map(|(chunk_id, entry)| (chunk_id.clone(), entry.metadata.document_id.clone()))
            .collect()
    }

    /// Distinct document ids with at least one live entry.
    #[inline]
    pub fn document_ids(&self) -> Vec<String> {
        let snapshot = self.current();
        let mut ids: Vec<String> = snapshot
            .entries
            .values()
            .filter(|entry| !entry.deleted)
            .map(|entry| entry.metadata.document_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Write a durable snapshot of the live entries. The file is written to a
    /// temporary sibling and renamed so a crash never leaves a truncated
    /// snapshot behind.
    #[inline]
    pub fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = self.current();

        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            dimension: self.dimension,
            metric: self.metric,
            entries: snapshot
                .entries
                .iter()
                .filter(|(_, entry)| !entry.deleted)
                .map(|(chunk_id, entry)| IndexEntry {
                    chunk_id: chunk_id.clone(),
                    vector: entry.vector.clone(),
                    metadata: entry.metadata.clone(),
                })
                .collect(),
        };

        let json = serde_json::to_string(&file)
            .map_err(|e| RagError::CorruptIndex(format!("failed to serialize snapshot: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;

        info!(
            "Persisted {} entries to {}",
            file.entries.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a snapshot from disk. Version, metric, and dimension are checked
    /// eagerly against the configured values so model-version drift fails at
    /// load time, not at first query.
    #[inline]
    pub fn load(path: &Path, dimension: usize, metric: SimilarityMetric) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::CorruptIndex(format!("failed to read {}: {}", path.display(), e))
        })?;

        let file: SnapshotFile = serde_json::from_str(&content).map_err(|e| {
            RagError::CorruptIndex(format!("malformed snapshot {}: {}", path.display(), e))
        })?;

        if file.version != SNAPSHOT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported snapshot version {} (expected {})",
                file.version, SNAPSHOT_VERSION
            )));
        }

        if file.dimension != dimension {
            return Err(RagError::CorruptIndex(format!(
                "snapshot dimension {} disagrees with configured embedding dimension {}",
                file.dimension, dimension
            )));
        }

        if file.metric != metric {
            return Err(RagError::CorruptIndex(format!(
                "snapshot metric {} disagrees with configured metric {}",
                file.metric, metric
            )));
        }

        for entry in &file.entries {
            if entry.vector.len() != dimension {
                return Err(RagError::CorruptIndex(format!(
                    "entry {} has {} dimensions, expected {}",
                    entry.chunk_id,
                    entry.vector.len(),
                    dimension
                )));
            }
        }

        let index = Self::new(dimension, metric);
        let count = file.entries.len();
        index.rebuild(file.entries)?;

        info!("Loaded {} entries from {}", count, path.display());
        Ok(index)
    }

    fn score(&self, query: &[f32], vector: &[f32]) -> f32 {
        match self.metric {
            SimilarityMetric::Cosine => cosine_similarity(query, vector),
            SimilarityMetric::InnerProduct => dot_product(query, vector),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::InvalidConfig(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn swap(&self, next: Snapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
    }

    /// Apply a mutation to a copy of the current entry map and swap it in.
    /// `insert` and `remove` exclude each other on the writer lock but never
    /// block concurrent searches.
    fn mutate<F>(&self, apply: F)
    where
        F: FnOnce(&mut BTreeMap<String, StoredEntry>),
    {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut map = self.current().entries.clone();
        apply(&mut map);
        self.swap(Snapshot { entries: map });
    }
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
