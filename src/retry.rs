//! Bounded exponential backoff for calls to external services

use std::future::Future;

use crate::config::RetryConfig;
use crate::error::RagResult;

/// Run `op` until it succeeds, fails permanently, or attempts run out.
/// Only transient failures (timeouts, rate limits, connect errors, 5xx)
/// are retried; the last error is returned once attempts are exhausted.
pub(crate) async fn with_backoff<T, F, Fut>(retry: &RetryConfig, mut op: F) -> RagResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RagResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                log::warn!(
                    "transient failure (attempt {attempt}/{}), retrying in {delay:?}: {err}",
                    retry.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_retry(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: RagResult<()> = with_backoff(&fast_retry(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RagError::EmbeddingService("bad payload".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_until_exhaustion() {
        let calls = AtomicUsize::new(0);
        let result: RagResult<()> = with_backoff(&fast_retry(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RagError::RateLimited("slow down".into())) }
        })
        .await;

        assert!(matches!(result, Err(RagError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_backoff(&fast_retry(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RagError::Timeout("simulated".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 500,
        };
        assert_eq!(retry.delay_for(1).as_millis(), 500);
        assert_eq!(retry.delay_for(2).as_millis(), 1000);
        assert_eq!(retry.delay_for(3).as_millis(), 2000);
        assert_eq!(retry.delay_for(9), retry.delay_for(6));
    }
}
