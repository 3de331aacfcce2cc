//! Query engine: the single `answer` entry point for shells

use std::sync::Arc;

use crate::config::{NoContextPolicy, RagConfig};
use crate::embedding::{Embedder, HttpEmbeddingClient};
use crate::error::{RagError, RagResult};
use crate::index::VectorIndex;
use crate::retriever::Retriever;
use crate::synthesizer::{HttpGenerationClient, Synthesizer};
use crate::types::Answer;

/// The fixed reply used by the [`NoContextPolicy::Decline`] fallback
pub const DECLINE_ANSWER: &str =
    "I couldn't find an answer to that in the indexed documents.";

/// Stateless coordinator over retrieval and synthesis
///
/// Holds no mutable state of its own; the shared [`VectorIndex`] is the
/// only stateful collaborator. Dropping the future returned by
/// [`QueryEngine::answer`] (e.g. on client disconnect) aborts any
/// in-flight service call.
pub struct QueryEngine {
    retriever: Retriever,
    synthesizer: Synthesizer,
    default_top_k: usize,
    no_context: NoContextPolicy,
}

impl QueryEngine {
    /// Create an engine from already-built parts
    pub fn new(retriever: Retriever, synthesizer: Synthesizer, config: &RagConfig) -> Self {
        Self {
            retriever,
            synthesizer,
            default_top_k: config.retrieval.top_k.max(1),
            no_context: config.synthesis.no_context,
        }
    }

    /// Create an engine wired to the HTTP embedding and generation services
    pub fn from_config(config: &RagConfig, index: Arc<VectorIndex>) -> RagResult<Self> {
        let provider = Arc::new(HttpEmbeddingClient::new(config.embedding.clone())?);
        let embedder = Arc::new(Embedder::new(provider, &config.embedding));
        let retriever = Retriever::new(embedder, index, &config.retrieval);

        let generation = Arc::new(HttpGenerationClient::new(config.generation.clone())?);
        let synthesizer = Synthesizer::new(
            generation,
            &config.synthesis,
            config.generation.retry.clone(),
        );

        Ok(Self::new(retriever, synthesizer, config))
    }

    /// Answer a natural-language query from the indexed documents.
    ///
    /// `top_k` overrides the configured retrieval depth. When no indexed
    /// chunk is relevant enough, the configured [`NoContextPolicy`] decides
    /// between a fixed declining answer and an unaided completion; service
    /// failures always propagate to the caller.
    pub async fn answer(&self, query: &str, top_k: Option<usize>) -> RagResult<Answer> {
        let k = top_k.unwrap_or(self.default_top_k);

        match self.retriever.retrieve(query, k).await {
            Ok(retrieval) => self.synthesizer.synthesize(query, &retrieval).await,
            Err(RagError::NoRelevantContext) => match self.no_context {
                NoContextPolicy::Decline => {
                    log::info!("no relevant context; declining to answer");
                    Ok(Answer {
                        text: DECLINE_ANSWER.to_string(),
                        sources: Vec::new(),
                    })
                }
                NoContextPolicy::AnswerUnaided => {
                    log::info!("no relevant context; answering unaided");
                    self.synthesizer.synthesize_unaided(query).await
                }
            },
            Err(err) => Err(err),
        }
    }
}
