//! Answer synthesis: prompt assembly over a generation service
//!
//! [`GenerationProvider`] is the wire contract: one role-separated prompt
//! in, one text completion out. [`HttpGenerationClient`] speaks the
//! OpenAI-style `/chat/completions` protocol. [`Synthesizer`] packs the
//! retrieved chunks into a bounded prompt, most relevant first, and always
//! reports exactly the chunks it sent.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GenerationConfig, RetryConfig, SynthesisConfig};
use crate::error::{RagError, RagResult};
use crate::retry::with_backoff;
use crate::types::{Answer, Chunk, RetrievalResult, ScoredChunk};

/// A role-separated prompt for the generation service
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Standing instructions
    pub system: String,
    /// Context and question
    pub user: String,
}

/// Wire contract of the external generation service
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce a single text completion for `prompt`
    async fn complete(&self, prompt: &Prompt) -> RagResult<String>;
}

/// OpenAI-style chat completion client
pub struct HttpGenerationClient {
    config: GenerationConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpGenerationClient {
    /// Create a new generation client
    pub fn new(config: GenerationConfig) -> RagResult<Self> {
        config.get_api_key()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RagError::Http)?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationClient {
    async fn complete(&self, prompt: &Prompt) -> RagResult<String> {
        let api_key = self.config.get_api_key()?;
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&request)
            .send()
            .await
            .map_err(RagError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(RagError::Http)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RagError::RateLimited(body));
        }
        if status.is_server_error() {
            return Err(RagError::Unavailable(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(RagError::GenerationService(format!(
                "API error ({status}): {body}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(RagError::Json)?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(RagError::GenerationService(
                "response contained no completion text".to_string(),
            ));
        }
        Ok(text)
    }
}

const SYSTEM_INSTRUCTIONS: &str = "You are a helpful expert on the indexed documentation. \
Answer the user's question based only on the provided context. \
If the context does not contain the answer, state that you could not find one in the indexed documents. \
Do not make up information. Be concise and include code examples when the context provides them.";

const UNAIDED_INSTRUCTIONS: &str = "You are a helpful expert assistant. \
Answer the user's question from general knowledge, and say so when you are unsure. \
Be concise.";

/// Builds prompts from retrieved chunks and queries the generation service
pub struct Synthesizer {
    provider: Arc<dyn GenerationProvider>,
    max_context_chars: usize,
    retry: RetryConfig,
}

impl Synthesizer {
    /// Create a synthesizer over a generation provider
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        config: &SynthesisConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            provider,
            max_context_chars: config.max_context_chars.max(1),
            retry,
        }
    }

    /// Generate an answer grounded in the retrieved chunks. The returned
    /// [`Answer::sources`] lists exactly the chunks that entered the prompt.
    pub async fn synthesize(&self, query: &str, retrieval: &RetrievalResult) -> RagResult<Answer> {
        let (context, sources) = self.pack_context(&retrieval.hits);
        let prompt = Prompt {
            system: SYSTEM_INSTRUCTIONS.to_string(),
            user: format!("Context:\n{context}\nQuestion:\n{query}"),
        };

        let text = self.complete_with_retry(&prompt).await?;
        log::debug!("synthesized answer from {} source chunks", sources.len());
        Ok(Answer { text, sources })
    }

    /// Generate an answer without retrieved context (fallback policy path)
    pub async fn synthesize_unaided(&self, query: &str) -> RagResult<Answer> {
        let prompt = Prompt {
            system: UNAIDED_INSTRUCTIONS.to_string(),
            user: format!("Question:\n{query}"),
        };

        let text = self.complete_with_retry(&prompt).await?;
        Ok(Answer {
            text,
            sources: Vec::new(),
        })
    }

    async fn complete_with_retry(&self, prompt: &Prompt) -> RagResult<String> {
        let provider = Arc::clone(&self.provider);
        with_backoff(&self.retry, || {
            let provider = Arc::clone(&provider);
            async move { provider.complete(prompt).await }
        })
        .await
        .map_err(|err| {
            if err.is_transient() {
                RagError::GenerationService(format!("retries exhausted: {err}"))
            } else {
                err
            }
        })
    }

    /// Pack chunk texts most-relevant-first under the character budget.
    /// Once the budget would overflow, the remaining (lowest-ranked) chunks
    /// are dropped; the top hit always ships, truncated if it alone exceeds
    /// the budget.
    fn pack_context(&self, hits: &[ScoredChunk]) -> (String, Vec<Chunk>) {
        let mut context = String::new();
        let mut sources: Vec<Chunk> = Vec::new();
        let mut used = 0usize;

        for (i, hit) in hits.iter().enumerate() {
            let header = match hit.chunk.heading_path.as_str() {
                "" => format!("[{}] (source: {})\n", i + 1, hit.chunk.doc_id),
                path => format!("[{}] (source: {}, {})\n", i + 1, hit.chunk.doc_id, path),
            };
            let header_chars = header.chars().count();
            let block_chars = header_chars + hit.chunk.text.chars().count() + 2;

            if used + block_chars > self.max_context_chars {
                if sources.is_empty() {
                    let budget = self
                        .max_context_chars
                        .saturating_sub(header_chars + 2)
                        .max(1);
                    let truncated: String = hit.chunk.text.chars().take(budget).collect();
                    context.push_str(&header);
                    context.push_str(&truncated);
                    context.push_str("\n\n");
                    sources.push(hit.chunk.clone());
                }
                break;
            }

            context.push_str(&header);
            context.push_str(&hit.chunk.text);
            context.push_str("\n\n");
            used += block_chars;
            sources.push(hit.chunk.clone());
        }

        (context, sources)
    }
}
