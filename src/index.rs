//! In-memory vector index with atomic JSON persistence
//!
//! The index is the only shared mutable structure in the engine. A single
//! `RwLock` serializes `insert`/`delete` against each other while letting
//! any number of `search` calls proceed concurrently, each over one
//! consistent snapshot (the read guard spans the whole scan).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{RagError, RagResult};
use crate::types::{IndexEntry, ScoredChunk};

/// Exact nearest-neighbor index over embedding vectors
///
/// The first successful insert establishes the vector dimension and the
/// embedding model version; every later insert must match both.
#[derive(Debug, Default)]
pub struct VectorIndex {
    inner: RwLock<IndexInner>,
}

/// Persisted snapshot layout: model version, dimensions and full entries,
/// enough to detect staleness after an embedding model upgrade.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexInner {
    dimensions: Option<usize>,
    model_version: Option<String>,
    built_at: Option<DateTime<Utc>>,
    entries: Vec<IndexEntry>,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Total index entries
    pub entries: usize,
    /// Distinct documents represented
    pub documents: usize,
    /// Established vector dimension, if any entry was inserted
    pub dimensions: Option<usize>,
    /// Embedding model version the index was built with
    pub model_version: Option<String>,
    /// Last structural update
    pub built_at: Option<DateTime<Utc>>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add entries produced by `model_version`. Every entry is validated
    /// against the established dimension and model before anything is
    /// stored; a failed insert leaves the index untouched.
    pub fn insert(&self, entries: Vec<IndexEntry>, model_version: &str) -> RagResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.write();

        if let Some(ref existing) = inner.model_version {
            if existing != model_version {
                return Err(RagError::ModelMismatch {
                    existing: existing.clone(),
                    incoming: model_version.to_string(),
                });
            }
        }

        let expected = inner.dimensions.unwrap_or_else(|| entries[0].vector.len());
        if expected == 0 {
            return Err(RagError::EmbeddingService(
                "refusing to index zero-dimension vectors".to_string(),
            ));
        }
        for entry in &entries {
            if entry.vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: entry.vector.len(),
                });
            }
            if entry.vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::EmbeddingService(format!(
                    "non-finite vector component in chunk {}#{}",
                    entry.chunk.doc_id, entry.chunk.seq
                )));
            }
        }

        let count = entries.len();
        inner.dimensions = Some(expected);
        inner.model_version = Some(model_version.to_string());
        inner.built_at = Some(Utc::now());
        inner.entries.extend(entries);
        Ok(count)
    }

    /// Search for the `top_k` entries most similar to `query` (cosine),
    /// descending score, ties broken by insertion order. An empty index
    /// returns an empty result.
    pub fn search(&self, query: &[f32], top_k: usize) -> RagResult<Vec<ScoredChunk>> {
        let inner = self.inner.read();
        if inner.entries.is_empty() {
            return Ok(Vec::new());
        }

        let dimensions = match inner.dimensions {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        if query.len() != dimensions {
            return Err(RagError::DimensionMismatch {
                expected: dimensions,
                actual: query.len(),
            });
        }

        let mut hits: Vec<ScoredChunk> = inner
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        // Stable sort: equal scores keep insertion order, earlier wins
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Remove all entries of one document; returns how many were dropped
    pub fn delete(&self, doc_id: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|entry| entry.chunk.doc_id != doc_id);
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.built_at = Some(Utc::now());
        }
        removed
    }

    /// Total entries
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Established vector dimension, if any insert happened
    pub fn dimensions(&self) -> Option<usize> {
        self.inner.read().dimensions
    }

    /// Embedding model version the index was built with
    pub fn model_version(&self) -> Option<String> {
        self.inner.read().model_version.clone()
    }

    /// Index statistics
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        let documents: BTreeSet<&str> = inner
            .entries
            .iter()
            .map(|e| e.chunk.doc_id.as_str())
            .collect();
        IndexStats {
            entries: inner.entries.len(),
            documents: documents.len(),
            dimensions: inner.dimensions,
            model_version: inner.model_version.clone(),
            built_at: inner.built_at,
        }
    }

    /// Persist a snapshot. The snapshot is written to a sibling temp file
    /// and renamed into place, so readers never observe a partial write.
    pub fn save(&self, path: &Path) -> RagResult<()> {
        let json = {
            let inner = self.inner.read();
            serde_json::to_vec_pretty(&*inner)?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("index.json");
        let tmp = path.with_file_name(format!("{file_name}.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        log::debug!("index snapshot written to {}", path.display());
        Ok(())
    }

    /// Load a snapshot, validating its internal consistency. Unparseable
    /// or inconsistent snapshots fail with `IndexCorruption` and are never
    /// silently repaired.
    pub fn load(path: &Path) -> RagResult<Self> {
        let bytes = std::fs::read(path)?;
        let inner: IndexInner = serde_json::from_slice(&bytes)
            .map_err(|e| RagError::IndexCorruption(format!("unreadable snapshot: {e}")))?;

        if !inner.entries.is_empty() {
            let dimensions = inner.dimensions.ok_or_else(|| {
                RagError::IndexCorruption("snapshot has entries but no dimensions".to_string())
            })?;
            if inner.model_version.is_none() {
                return Err(RagError::IndexCorruption(
                    "snapshot has entries but no embedding model version".to_string(),
                ));
            }
            for entry in &inner.entries {
                if entry.vector.len() != dimensions {
                    return Err(RagError::IndexCorruption(format!(
                        "chunk {}#{} has dimension {} in an index of dimension {}",
                        entry.chunk.doc_id,
                        entry.chunk.seq,
                        entry.vector.len(),
                        dimensions
                    )));
                }
                if entry.vector.iter().any(|v| !v.is_finite()) {
                    return Err(RagError::IndexCorruption(format!(
                        "chunk {}#{} carries a non-finite vector component",
                        entry.chunk.doc_id, entry.chunk.seq
                    )));
                }
            }
        }

        log::info!(
            "index snapshot loaded from {} ({} entries)",
            path.display(),
            inner.entries.len()
        );
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

/// Cosine similarity between two vectors of equal length
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;
    use std::sync::Arc;

    fn entry(doc_id: &str, seq: usize, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                doc_id: doc_id.to_string(),
                seq,
                text: format!("chunk {seq} of {doc_id}"),
                start_offset: 0,
                end_offset: 0,
                heading_path: String::new(),
            },
            vector,
        }
    }

    #[test]
    fn search_returns_descending_scores() {
        let index = VectorIndex::new();
        index
            .insert(
                vec![
                    entry("a", 0, vec![1.0, 0.0]),
                    entry("b", 0, vec![0.0, 1.0]),
                    entry("c", 0, vec![0.7, 0.7]),
                ],
                "model-1",
            )
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.doc_id, "a");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = VectorIndex::new();
        index
            .insert(
                vec![
                    entry("first", 0, vec![1.0, 0.0]),
                    entry("second", 0, vec![1.0, 0.0]),
                    entry("third", 0, vec![2.0, 0.0]),
                ],
                "model-1",
            )
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        // all three have cosine 1.0; earlier insertion wins
        assert_eq!(hits[0].chunk.doc_id, "first");
        assert_eq!(hits[1].chunk.doc_id, "second");
        assert_eq!(hits[2].chunk.doc_id, "third");
    }

    #[test]
    fn top_k_beyond_size_returns_everything() {
        let index = VectorIndex::new();
        index
            .insert(vec![entry("a", 0, vec![1.0, 0.0])], "model-1")
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn empty_index_returns_empty_result() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_leaves_index_unchanged() {
        let index = VectorIndex::new();
        index
            .insert(vec![entry("a", 0, vec![0.1; 1536])], "model-1")
            .unwrap();

        let err = index
            .insert(vec![entry("b", 0, vec![0.1; 768])], "model-1")
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 1536,
                actual: 768
            }
        ));
        assert_eq!(index.len(), 1);

        let err = index.search(&[0.1; 768], 5).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
    }

    #[test]
    fn partially_invalid_batch_is_rejected_wholesale() {
        let index = VectorIndex::new();
        let err = index
            .insert(
                vec![entry("a", 0, vec![1.0, 0.0]), entry("a", 1, vec![1.0])],
                "model-1",
            )
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert!(index.is_empty());
        assert!(index.dimensions().is_none());
    }

    #[test]
    fn model_mixing_is_rejected() {
        let index = VectorIndex::new();
        index
            .insert(vec![entry("a", 0, vec![1.0, 0.0])], "model-1")
            .unwrap();

        let err = index
            .insert(vec![entry("b", 0, vec![0.0, 1.0])], "model-2")
            .unwrap_err();
        assert!(matches!(err, RagError::ModelMismatch { .. }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn delete_then_reinsert_restores_results() {
        let index = VectorIndex::new();
        let doc_entries = vec![
            entry("doc", 0, vec![0.9, 0.1]),
            entry("doc", 1, vec![0.4, 0.6]),
        ];
        index.insert(doc_entries.clone(), "model-1").unwrap();
        index
            .insert(vec![entry("other", 0, vec![0.2, 0.8])], "model-1")
            .unwrap();

        let before = index.search(&[1.0, 0.0], 10).unwrap();

        assert_eq!(index.delete("doc"), 2);
        assert_eq!(index.len(), 1);

        index.insert(doc_entries, "model-1").unwrap();
        let after = index.search(&[1.0, 0.0], 10).unwrap();

        let ids = |hits: &[ScoredChunk]| {
            hits.iter()
                .map(|h| (h.chunk.doc_id.clone(), h.chunk.seq))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&before), ids(&after));
    }

    #[test]
    fn delete_missing_document_is_a_noop() {
        let index = VectorIndex::new();
        index
            .insert(vec![entry("a", 0, vec![1.0, 0.0])], "model-1")
            .unwrap();
        assert_eq!(index.delete("ghost"), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn stats_count_entries_and_documents() {
        let index = VectorIndex::new();
        index
            .insert(
                vec![
                    entry("a", 0, vec![1.0, 0.0]),
                    entry("a", 1, vec![0.0, 1.0]),
                    entry("b", 0, vec![0.5, 0.5]),
                ],
                "model-1",
            )
            .unwrap();

        let stats = index.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.dimensions, Some(2));
        assert_eq!(stats.model_version.as_deref(), Some("model-1"));
        assert!(stats.built_at.is_some());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let index = VectorIndex::new();
        index
            .insert(
                vec![
                    entry("a", 0, vec![0.9, 0.1]),
                    entry("b", 0, vec![0.1, 0.9]),
                ],
                "model-1",
            )
            .unwrap();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.model_version().as_deref(), Some("model-1"));

        let before = index.search(&[1.0, 0.0], 10).unwrap();
        let after = loaded.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].chunk.doc_id, after[0].chunk.doc_id);
    }

    #[test]
    fn save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let index = VectorIndex::new();
        index
            .insert(vec![entry("a", 0, vec![1.0, 0.0])], "model-1")
            .unwrap();
        index.save(&path).unwrap();
        index
            .insert(vec![entry("b", 0, vec![0.0, 1.0])], "model-1")
            .unwrap();
        index.save(&path).unwrap();

        assert!(!path.with_file_name("index.json.tmp").exists());
        assert_eq!(VectorIndex::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn corrupted_snapshot_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"definitely not json").unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, RagError::IndexCorruption(_)));
    }

    #[test]
    fn inconsistent_snapshot_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let snapshot = serde_json::json!({
            "dimensions": 2,
            "model_version": "model-1",
            "built_at": null,
            "entries": [
                { "chunk": { "doc_id": "a", "seq": 0, "text": "t", "start_offset": 0, "end_offset": 1 }, "vector": [1.0, 0.0, 0.5] }
            ]
        });
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, RagError::IndexCorruption(_)));
    }

    #[test]
    fn concurrent_searches_and_inserts_are_safe() {
        let index = Arc::new(VectorIndex::new());
        index
            .insert(vec![entry("seed", 0, vec![1.0, 0.0])], "model-1")
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let hits = index.search(&[1.0, 0.0], 10).unwrap();
                    assert!(!hits.is_empty());
                }
            }));
        }

        for i in 0..50 {
            index
                .insert(vec![entry(&format!("d{i}"), 0, vec![0.5, 0.5])], "model-1")
                .unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), 51);
    }

    #[test]
    fn cosine_similarity_behaves() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
