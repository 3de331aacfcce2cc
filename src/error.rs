//! Error types for the query engine

use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid configuration or call parameters
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed ingestion input (beyond the empty-document allowance)
    #[error("chunking error: {0}")]
    Chunking(String),

    /// The embedding service is unreachable or returned malformed output
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The generation service is unreachable or returned malformed output
    #[error("generation service error: {0}")]
    GenerationService(String),

    /// A vector's dimension does not match the index's established dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vectors from a different embedding model cannot join this index
    #[error("embedding model mismatch: index holds vectors from {existing}, got {incoming}")]
    ModelMismatch { existing: String, incoming: String },

    /// No indexed chunk cleared the similarity threshold.
    /// A valid query outcome, not a service failure; callers pick a fallback.
    #[error("no indexed content cleared the similarity threshold")]
    NoRelevantContext,

    /// The remote service asked us to slow down (retried with backoff)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A request exceeded its deadline (retried with backoff)
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The remote service returned a server-side failure (retried with backoff)
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A persisted index snapshot failed to load or is internally inconsistent
    #[error("index corrupted: {0}")]
    IndexCorruption(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::RateLimited(_) | RagError::Timeout(_) | RagError::Unavailable(_) => true,
            RagError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

pub type RagResult<T> = Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RagError::RateLimited("429".into()).is_transient());
        assert!(RagError::Timeout("deadline".into()).is_transient());
        assert!(RagError::Unavailable("502".into()).is_transient());
        assert!(!RagError::NoRelevantContext.is_transient());
        assert!(!RagError::EmbeddingService("bad payload".into()).is_transient());
        assert!(!RagError::DimensionMismatch { expected: 1536, actual: 768 }.is_transient());
    }

    #[test]
    fn display_carries_detail() {
        let err = RagError::DimensionMismatch { expected: 1536, actual: 768 };
        let text = format!("{err}");
        assert!(text.contains("1536"));
        assert!(text.contains("768"));
    }
}
