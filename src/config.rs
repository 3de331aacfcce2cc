//! Engine configuration
//!
//! Layered loading: built-in defaults, then `config.toml` under the base
//! directory, then environment variables. API keys are resolved lazily so a
//! missing key only fails operations that actually call the service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, RagResult};

/// Top-level configuration for the query engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation service configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Document chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval behavior configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Answer synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Paths configuration
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Retry policy for calls to external services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay in milliseconds, doubled on each further attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the attempt following `attempt` (1-based), capped.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let capped = attempt.clamp(1, 6) as u32;
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << (capped - 1)))
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key (falls back to `EMBEDDING_API_KEY` / `OPENAI_API_KEY`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_embedding_api_base")]
    pub api_base: String,

    /// Model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Maximum texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_embedding_api_base(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Get the API key from config or environment
    pub fn get_api_key(&self) -> RagResult<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }

        std::env::var("EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| RagError::Config("missing embedding API key".to_string()))
    }
}

fn default_embedding_api_base() -> String {
    std::env::var("EMBEDDING_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_timeout_secs() -> u64 {
    30
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// API key (falls back to `GENERATION_API_KEY` / `OPENAI_API_KEY`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_generation_api_base")]
    pub api_base: String,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Completion token budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_generation_api_base(),
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl GenerationConfig {
    /// Get the API key from config or environment
    pub fn get_api_key(&self) -> RagResult<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }

        std::env::var("GENERATION_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| RagError::Config("missing generation API key".to_string()))
    }
}

fn default_generation_api_base() -> String {
    std::env::var("GENERATION_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

/// Document chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters (not bytes)
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Overlap between adjacent chunks in characters
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    1500
}

fn default_overlap_chars() -> usize {
    200
}

/// Retrieval behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of chunks to retrieve
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum cosine similarity a hit must clear
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.3
}

/// What `answer` does when no chunk clears the similarity threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoContextPolicy {
    /// Reply with a fixed "not found in the indexed documents" answer
    #[default]
    Decline,
    /// Ask the generation service without a context block
    AnswerUnaided,
}

/// Answer synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Character budget for the context block of the prompt
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Fallback behavior when retrieval finds nothing relevant
    #[serde(default)]
    pub no_context: NoContextPolicy,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
            no_context: NoContextPolicy::default(),
        }
    }
}

fn default_max_context_chars() -> usize {
    4000
}

/// Paths configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Persisted index snapshot path
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl PathsConfig {
    /// Get the index snapshot path, using the default if not specified
    pub fn get_index_path(&self) -> PathBuf {
        if let Some(ref path) = self.index_path {
            return path.clone();
        }

        base_dir().join("index.json")
    }
}

fn base_dir() -> PathBuf {
    if let Ok(root) = std::env::var("OPENANSWER_ROOT") {
        return PathBuf::from(root);
    }

    dirs::home_dir()
        .map(|h| h.join(".openanswer"))
        .unwrap_or_else(|| PathBuf::from(".openanswer"))
}

impl RagConfig {
    /// Load configuration from file and environment
    /// Priority: environment variables > config.toml > defaults
    pub fn load() -> RagResult<Self> {
        let mut config = Self::default();

        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            config = toml::from_str(&content)
                .map_err(|e| RagError::Config(format!("invalid {}: {e}", path.display())))?;
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = std::env::var("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(api_base) = std::env::var("GENERATION_API_BASE") {
            self.generation.api_base = api_base;
        }
        if let Ok(model) = std::env::var("GENERATION_MODEL") {
            self.generation.model = model;
        }
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> RagResult<()> {
        if self.chunking.max_chunk_chars == 0 {
            return Err(RagError::Config("max_chunk_chars must be positive".into()));
        }
        if self.chunking.overlap_chars == 0 || self.chunking.overlap_chars >= self.chunking.max_chunk_chars {
            return Err(RagError::Config(format!(
                "overlap_chars must satisfy 0 < overlap ({}) < max_chunk_chars ({})",
                self.chunking.overlap_chars, self.chunking.max_chunk_chars
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("top_k must be a positive integer".into()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(RagError::Config(format!(
                "min_score must be within [0, 1], got {}",
                self.retrieval.min_score
            )));
        }
        if self.synthesis.max_context_chars == 0 {
            return Err(RagError::Config("max_context_chars must be positive".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("batch_size must be positive".into()));
        }
        for (name, retry) in [("embedding", &self.embedding.retry), ("generation", &self.generation.retry)] {
            if retry.max_attempts == 0 {
                return Err(RagError::Config(format!("{name}.retry.max_attempts must be positive")));
            }
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return Err(RagError::Config("service timeouts must be positive".into()));
        }
        Ok(())
    }
}
