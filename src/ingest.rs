//! Build-time ingestion pipeline: chunk, embed, insert

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::chunker::Chunker;
use crate::config::RagConfig;
use crate::embedding::{Embedder, HttpEmbeddingClient};
use crate::error::{RagError, RagResult};
use crate::index::VectorIndex;
use crate::types::{Document, DocumentMeta, IndexEntry, SourceSet};

/// Ingestion statistics
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    /// Documents processed
    pub documents: usize,
    /// Chunks created and indexed
    pub chunks: usize,
    /// Time elapsed in milliseconds
    pub elapsed_ms: u64,
}

/// Ingestion progress, reported after each document
#[derive(Debug, Clone, Serialize)]
pub struct IngestProgress {
    /// Logical source currently being processed
    pub site: String,
    /// Documents processed so far
    pub current: usize,
    /// Total documents to process
    pub total: usize,
    /// Chunks indexed so far
    pub chunks: usize,
}

/// Turns crawled documents into index entries
pub struct Indexer {
    chunker: Chunker,
    embedder: Arc<Embedder>,
    index: Arc<VectorIndex>,
}

impl Indexer {
    /// Create an indexer from already-built parts
    pub fn new(chunker: Chunker, embedder: Arc<Embedder>, index: Arc<VectorIndex>) -> Self {
        Self {
            chunker,
            embedder,
            index,
        }
    }

    /// Create an indexer wired to the HTTP embedding service
    pub fn from_config(config: &RagConfig, index: Arc<VectorIndex>) -> RagResult<Self> {
        let chunker = Chunker::new(config.chunking.max_chunk_chars, config.chunking.overlap_chars)?;
        let provider = Arc::new(HttpEmbeddingClient::new(config.embedding.clone())?);
        let embedder = Arc::new(Embedder::new(provider, &config.embedding));
        Ok(Self::new(chunker, embedder, index))
    }

    /// Ingest one document. Any entries a previous ingestion of the same
    /// identifier left behind are removed first, so re-crawling a page
    /// replaces its chunks instead of accumulating duplicates. Returns the
    /// number of chunks indexed (zero for empty documents).
    pub async fn ingest_document(&self, document: &Document) -> RagResult<usize> {
        if document.id.trim().is_empty() {
            return Err(RagError::Chunking(
                "document identifier must not be blank".to_string(),
            ));
        }

        self.index.delete(&document.id);

        let chunks = self.chunker.chunk(document);
        if chunks.is_empty() {
            log::debug!("{}: no indexable text", document.id);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let model = self.embedder.model_version().ok_or_else(|| {
            RagError::EmbeddingService("provider did not report a model identifier".to_string())
        })?;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        let count = self.index.insert(entries, &model)?;
        log::debug!("{}: indexed {count} chunks", document.id);
        Ok(count)
    }

    /// Ingest every document of every source
    pub async fn ingest_all(&self, sources: &SourceSet) -> RagResult<IngestStats> {
        self.ingest_all_with_progress(sources, |_| {}).await
    }

    /// Ingest every document of every source, reporting progress per document
    pub async fn ingest_all_with_progress<F>(
        &self,
        sources: &SourceSet,
        mut on_progress: F,
    ) -> RagResult<IngestStats>
    where
        F: FnMut(IngestProgress),
    {
        let start = Instant::now();
        let total: usize = sources.values().map(Vec::len).sum();
        let mut processed = 0usize;
        let mut chunks = 0usize;

        for (site, documents) in sources {
            log::info!("ingesting {} documents from {site}", documents.len());
            for source_document in documents {
                let document = Document {
                    id: source_document.id.clone(),
                    text: source_document.text.clone(),
                    meta: DocumentMeta {
                        site: site.clone(),
                        crawled_at: Utc::now(),
                    },
                };
                chunks += self.ingest_document(&document).await?;
                processed += 1;
                on_progress(IngestProgress {
                    site: site.clone(),
                    current: processed,
                    total,
                    chunks,
                });
            }
        }

        let stats = IngestStats {
            documents: processed,
            chunks,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        log::info!(
            "ingested {} documents ({} chunks) in {} ms",
            stats.documents,
            stats.chunks,
            stats.elapsed_ms
        );
        Ok(stats)
    }

    /// Remove one document from the index; returns dropped entry count
    pub fn remove_document(&self, doc_id: &str) -> usize {
        self.index.delete(doc_id)
    }
}
