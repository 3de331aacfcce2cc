//! Query-time retrieval: embed, search, threshold

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::index::VectorIndex;
use crate::types::{RetrievalResult, ScoredChunk};

/// Embeds a query and ranks index entries against it
pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<VectorIndex>,
    min_score: f32,
}

impl Retriever {
    /// Create a retriever over a shared embedder and index
    pub fn new(embedder: Arc<Embedder>, index: Arc<VectorIndex>, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            index,
            min_score: config.min_score,
        }
    }

    /// Retrieve up to `top_k` chunks relevant to `query`, best first.
    /// Hits below the similarity threshold are dropped; when none survive
    /// the result is [`RagError::NoRelevantContext`], a recoverable
    /// outcome the caller resolves by policy. A `top_k` beyond the index
    /// size simply returns every surviving entry.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> RagResult<RetrievalResult> {
        if top_k == 0 {
            return Err(RagError::Config("top_k must be a positive integer".into()));
        }
        if query.trim().is_empty() {
            return Err(RagError::Config("query must not be empty".into()));
        }
        if self.index.is_empty() {
            // nothing to rank; skip the embedding call entirely
            return Err(RagError::NoRelevantContext);
        }

        let query_vector = self.embedder.embed(query).await?;

        // A stale index (built by an older embedding model) must be
        // re-embedded, not searched with incomparable vectors.
        if let (Some(query_model), Some(index_model)) =
            (self.embedder.model_version(), self.index.model_version())
        {
            if query_model != index_model {
                return Err(RagError::ModelMismatch {
                    existing: index_model,
                    incoming: query_model,
                });
            }
        }

        let hits = self.index.search(&query_vector, top_k)?;

        let kept: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .collect();

        if kept.is_empty() {
            log::debug!("no hit cleared the {:.2} similarity threshold", self.min_score);
            return Err(RagError::NoRelevantContext);
        }

        log::debug!(
            "retrieved {} chunks (top score {:.3})",
            kept.len(),
            kept[0].score
        );
        Ok(RetrievalResult {
            query: query.to_string(),
            hits: kept,
        })
    }
}
