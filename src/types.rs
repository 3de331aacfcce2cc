//! Common types for the query engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw document handed over by the crawler, before ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Document identifier (source URL or path)
    pub id: String,
    /// Raw text content (plain text or markdown)
    pub text: String,
}

/// Ingestion input: logical source name to its crawled documents
pub type SourceSet = BTreeMap<String, Vec<SourceDocument>>;

/// An ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier (source URL or path)
    pub id: String,
    /// Raw text content
    pub text: String,
    /// Source metadata
    pub meta: DocumentMeta,
}

/// Source metadata attached to a document at ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Logical source name (site)
    pub site: String,
    /// Crawl timestamp
    pub crawled_at: DateTime<Utc>,
}

/// A bounded text segment derived from one document, the unit of
/// embedding and retrieval. `text` is the verbatim character range
/// `[start_offset, end_offset)` of the owning document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier of the owning document
    pub doc_id: String,
    /// Position of this chunk within the document, strictly increasing
    pub seq: usize,
    /// The text content of this chunk
    pub text: String,
    /// Start offset in characters (not bytes)
    pub start_offset: usize,
    /// End offset in characters (exclusive)
    pub end_offset: usize,
    /// Heading context (e.g. "Guide > Install"), empty when none applies
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub heading_path: String,
}

/// A chunk with its embedding vector, owned by the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The chunk
    pub chunk: Chunk,
    /// Embedding vector
    pub vector: Vec<f32>,
}

/// A retrieved chunk with its similarity score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    /// The chunk
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is better)
    pub score: f32,
}

/// Ranked retrieval output for one query, relevance-descending
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// The original query
    pub query: String,
    /// Retrieved chunks, best first
    pub hits: Vec<ScoredChunk>,
}

/// A generated answer plus the chunks that backed it
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The generated answer text
    pub text: String,
    /// Exactly the chunks whose text entered the prompt
    pub sources: Vec<Chunk>,
}
