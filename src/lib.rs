//! OpenAnswer core
//!
//! Retrieval-augmented query engine over crawled web documentation:
//! documents are chunked, embedded through an external embedding service
//! and stored in a vector index; queries retrieve the most relevant chunks
//! and feed them to a generation service for the final answer.
//!
//! ## Features
//!
//! - Boundary-preferring, overlap-preserving document chunking
//! - Embedding client with caching, batching and bounded-backoff retries
//! - Exact nearest-neighbor vector index with atomic JSON persistence
//! - Threshold-filtered retrieval with an explicit no-context outcome
//! - Prompt-bounded answer synthesis citing its exact source chunks
//!
//! The HTTP shell, the crawler and credential management live outside this
//! crate; it exposes [`Indexer`] for the build path and
//! [`QueryEngine::answer`] for the query path.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use openanswer_core::{Indexer, QueryEngine, RagConfig, VectorIndex};
//!
//! let config = RagConfig::load()?;
//! let index = Arc::new(VectorIndex::new());
//!
//! let indexer = Indexer::from_config(&config, index.clone())?;
//! indexer.ingest_all(&sources).await?;
//! index.save(&config.paths.get_index_path())?;
//!
//! let engine = QueryEngine::from_config(&config, index)?;
//! let answer = engine.answer("how do I install it?", None).await?;
//! ```

mod chunker;
mod config;
mod embedding;
mod engine;
mod error;
mod index;
mod ingest;
mod retriever;
mod retry;
mod synthesizer;
mod types;


pub use chunker::Chunker;
pub use config::{
    ChunkingConfig, EmbeddingConfig, GenerationConfig, NoContextPolicy, PathsConfig, RagConfig,
    RetrievalConfig, RetryConfig, SynthesisConfig,
};
pub use embedding::{Embedder, EmbeddingBatch, EmbeddingProvider, HttpEmbeddingClient};
pub use engine::{QueryEngine, DECLINE_ANSWER};
pub use error::{RagError, RagResult};
pub use index::{IndexStats, VectorIndex};
pub use ingest::{Indexer, IngestProgress, IngestStats};
pub use retriever::Retriever;
pub use synthesizer::{GenerationProvider, HttpGenerationClient, Prompt, Synthesizer};
pub use types::*;
