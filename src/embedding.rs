//! Embedding service boundary
//!
//! [`EmbeddingProvider`] is the wire contract: a list of texts in, one
//! vector per text out, plus the model identifier reported by the service.
//! [`HttpEmbeddingClient`] speaks the OpenAI-style `/embeddings` protocol.
//! [`Embedder`] fronts a provider with exact-text caching, request batching,
//! retry with backoff, and malformed-output rejection.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::error::{RagError, RagResult};
use crate::retry::with_backoff;

/// One order-preserving embedding response
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// One vector per input text, in input order
    pub vectors: Vec<Vec<f32>>,
    /// Model identifier reported by the service
    pub model: String,
}

/// Wire contract of the external embedding service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per text, order-preserving
    async fn embed(&self, texts: &[String]) -> RagResult<EmbeddingBatch>;
}

/// OpenAI-style embedding API client
pub struct HttpEmbeddingClient {
    config: EmbeddingConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl HttpEmbeddingClient {
    /// Create a new embedding client
    pub fn new(config: EmbeddingConfig) -> RagResult<Self> {
        // Fail fast when no API key can be resolved
        config.get_api_key()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RagError::Http)?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> RagResult<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                model: self.config.model.clone(),
            });
        }

        let api_key = self.config.get_api_key()?;
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
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
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(RagError::EmbeddingService(error_response.error.message));
            }
            return Err(RagError::EmbeddingService(format!("API error ({status}): {body}")));
        }

        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(RagError::Json)?;

        if parsed.data.len() != texts.len() {
            return Err(RagError::EmbeddingService(format!(
                "embedding count mismatch: sent {} texts, got {} embeddings",
                texts.len(),
                parsed.data.len()
            )));
        }

        // Sort by index to ensure input order
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        Ok(EmbeddingBatch {
            vectors: data.into_iter().map(|d| d.embedding).collect(),
            model: parsed.model,
        })
    }
}

/// Model identity pinned from the first successful response
#[derive(Debug, Clone)]
struct PinnedModel {
    model: String,
    dimensions: usize,
}

/// Caching, retrying front over an [`EmbeddingProvider`]
///
/// Identical input text reuses a previously computed vector, so re-chunked
/// or duplicated content costs a single quota unit per distinct text.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryConfig,
    cache: Mutex<HashMap<String, Vec<f32>>>,
    pinned: Mutex<Option<PinnedModel>>,
}

impl Embedder {
    /// Create an embedder over `provider` with the given batching/retry settings
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            retry: config.retry.clone(),
            cache: Mutex::new(HashMap::new()),
            pinned: Mutex::new(None),
        }
    }

    /// Vector dimension detected from the first response, if any
    pub fn dimensions(&self) -> Option<usize> {
        self.pinned.lock().as_ref().map(|p| p.dimensions)
    }

    /// Model identifier reported by the service, if any response arrived yet
    pub fn model_version(&self) -> Option<String> {
        self.pinned.lock().as_ref().map(|p| p.model.clone())
    }

    /// Embed a single text
    pub async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingService("no embedding returned".to_string()))
    }

    /// Embed many texts, one vector per input, in input order.
    /// Duplicate and previously seen texts are served from the cache.
    pub async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let todo: Vec<String> = {
            let cache = self.cache.lock();
            let mut seen = HashSet::new();
            texts
                .iter()
                .filter(|t| !cache.contains_key(t.as_str()) && seen.insert(t.as_str()))
                .cloned()
                .collect()
        };

        for batch in todo.chunks(self.batch_size) {
            let provider = Arc::clone(&self.provider);
            let response = with_backoff(&self.retry, || {
                let provider = Arc::clone(&provider);
                let batch = batch.to_vec();
                async move { provider.embed(&batch).await }
            })
            .await
            .map_err(exhausted_to_service_error)?;

            self.validate_and_cache(batch, response)?;
        }

        let cache = self.cache.lock();
        texts
            .iter()
            .map(|t| {
                cache.get(t.as_str()).cloned().ok_or_else(|| {
                    RagError::EmbeddingService(format!(
                        "service returned no embedding for an input of {} chars",
                        t.chars().count()
                    ))
                })
            })
            .collect()
    }

    fn validate_and_cache(&self, batch: &[String], response: EmbeddingBatch) -> RagResult<()> {
        if response.vectors.len() != batch.len() {
            return Err(RagError::EmbeddingService(format!(
                "embedding count mismatch: sent {} texts, got {} embeddings",
                batch.len(),
                response.vectors.len()
            )));
        }

        let dimensions = response.vectors.first().map(Vec::len).unwrap_or(0);
        if dimensions == 0 {
            return Err(RagError::EmbeddingService(
                "service returned an empty embedding vector".to_string(),
            ));
        }

        for vector in &response.vectors {
            if vector.len() != dimensions {
                return Err(RagError::EmbeddingService(format!(
                    "inconsistent dimensions within one response: {} vs {}",
                    dimensions,
                    vector.len()
                )));
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::EmbeddingService(
                    "service returned a non-finite vector component".to_string(),
                ));
            }
        }

        {
            let mut pinned = self.pinned.lock();
            match pinned.as_ref() {
                None => {
                    log::info!(
                        "embedding model pinned: {} ({dimensions} dimensions)",
                        response.model
                    );
                    *pinned = Some(PinnedModel {
                        model: response.model.clone(),
                        dimensions,
                    });
                }
                Some(existing) => {
                    if existing.model != response.model {
                        return Err(RagError::EmbeddingService(format!(
                            "embedding model changed mid-run: {} -> {}; re-embed the corpus instead of mixing versions",
                            existing.model, response.model
                        )));
                    }
                    if existing.dimensions != dimensions {
                        return Err(RagError::EmbeddingService(format!(
                            "embedding dimensions changed mid-run: {} -> {}",
                            existing.dimensions, dimensions
                        )));
                    }
                }
            }
        }

        let mut cache = self.cache.lock();
        for (text, vector) in batch.iter().zip(response.vectors) {
            cache.insert(text.clone(), vector);
        }
        Ok(())
    }
}

/// Retries exhausted on a transient failure: surface it as a service error
fn exhausted_to_service_error(err: RagError) -> RagError {
    if err.is_transient() {
        RagError::EmbeddingService(format!("retries exhausted: {err}"))
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: 2,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
            },
            ..EmbeddingConfig::default()
        }
    }

    /// Deterministic bag-of-words embedding for tests
    fn word_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; 32];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut h: u64 = 7;
            for b in word.bytes() {
                h = h.wrapping_mul(31).wrapping_add(u64::from(b));
            }
            v[(h % 32) as usize] += 1.0;
        }
        v
    }

    struct StubProvider {
        calls: AtomicUsize,
        model: String,
    }

    impl StubProvider {
        fn new(model: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                model: model.to_string(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(&self, texts: &[String]) -> RagResult<EmbeddingBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|t| word_vector(t)).collect(),
                model: self.model.clone(),
            })
        }
    }

    /// Fails with a transient error for the first `failures` calls
    struct FlakyProvider {
        inner: StubProvider,
        failures: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, texts: &[String]) -> RagResult<EmbeddingBatch> {
            let call = self.inner.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(RagError::Timeout("simulated timeout".into()));
            }
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|t| word_vector(t)).collect(),
                model: self.inner.model.clone(),
            })
        }
    }

    struct WrongShapeProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongShapeProvider {
        async fn embed(&self, texts: &[String]) -> RagResult<EmbeddingBatch> {
            let mut vectors: Vec<Vec<f32>> = texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect();
            if let Some(first) = vectors.first_mut() {
                first.push(0.4);
            }
            Ok(EmbeddingBatch {
                vectors,
                model: "stub".into(),
            })
        }
    }

    /// Reports a different model name on every call
    struct DriftingModelProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for DriftingModelProvider {
        async fn embed(&self, texts: &[String]) -> RagResult<EmbeddingBatch> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                model: format!("model-v{call}"),
            })
        }
    }

    #[tokio::test]
    async fn batch_output_is_order_preserving_and_one_to_one() {
        let embedder = Embedder::new(Arc::new(StubProvider::new("stub")), &fast_config());
        let texts: Vec<String> = ["alpha", "beta", "gamma", "alpha", "delta"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());
        assert_eq!(vectors[0], word_vector("alpha"));
        assert_eq!(vectors[1], word_vector("beta"));
        assert_eq!(vectors[0], vectors[3]);
    }

    #[tokio::test]
    async fn identical_text_is_served_from_cache() {
        let provider = Arc::new(StubProvider::new("stub"));
        let embedder = Embedder::new(provider.clone(), &fast_config());

        let texts: Vec<String> = vec!["same text".into(), "same text".into()];
        embedder.embed_batch(&texts).await.unwrap();
        // one unique text, batch size 2: a single provider call
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        embedder.embed("same text").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        embedder.embed("fresh text").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_calls_are_deterministic() {
        let embedder_a = Embedder::new(Arc::new(StubProvider::new("stub")), &fast_config());
        let embedder_b = Embedder::new(Arc::new(StubProvider::new("stub")), &fast_config());

        let a = embedder_a.embed("the capital of France").await.unwrap();
        let b = embedder_b.embed("the capital of France").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn recovers_from_transient_failures_with_three_attempts() {
        let provider = Arc::new(FlakyProvider {
            inner: StubProvider::new("stub"),
            failures: 2,
        });
        let embedder = Embedder::new(provider.clone(), &fast_config());

        let vector = embedder.embed("retry me").await.unwrap();
        assert!(!vector.is_empty());
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_service_error() {
        let provider = Arc::new(FlakyProvider {
            inner: StubProvider::new("stub"),
            failures: 10,
        });
        let embedder = Embedder::new(provider.clone(), &fast_config());

        let err = embedder.embed("never works").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(_)));
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn inconsistent_dimensions_are_rejected() {
        let embedder = Embedder::new(Arc::new(WrongShapeProvider), &fast_config());
        let texts: Vec<String> = vec!["a".into(), "b".into()];
        let err = embedder.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(_)));
    }

    #[tokio::test]
    async fn model_change_mid_run_is_rejected() {
        let embedder = Embedder::new(
            Arc::new(DriftingModelProvider {
                calls: AtomicUsize::new(0),
            }),
            &fast_config(),
        );

        embedder.embed("first").await.unwrap();
        assert_eq!(embedder.model_version().as_deref(), Some("model-v0"));

        let err = embedder.embed("second").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(_)));
    }
}
