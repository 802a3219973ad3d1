//! Resilient request executor: coalescing, rate limiting and retries.

use std::future::Future;
use std::sync::Arc;

use osmgate_core::{RetryConfig, UpstreamError};
use tokio::time::Instant;

use crate::rate_limit::RateLimiterRegistry;
use crate::singleflight::SingleFlight;

/// Turns one logical outbound call into a rate-limited, retried,
/// deduplicated operation.
///
/// Identical concurrent calls (same key) share a single attempt group, so
/// every caller sees the same final outcome and never an intermediate
/// attempt's failure.
#[derive(Debug)]
pub struct RequestExecutor<T> {
    limiter: Arc<RateLimiterRegistry>,
    retry: RetryConfig,
    flights: SingleFlight<T>,
}

impl<T> RequestExecutor<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(limiter: Arc<RateLimiterRegistry>, retry: RetryConfig) -> Self {
        Self {
            limiter,
            retry,
            flights: SingleFlight::new(),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn limiter(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiter
    }

    /// Number of distinct keys with requests in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Execute `make_request` for `key` against `service`.
    ///
    /// Each attempt waits for a rate-limit token first. Transport and status
    /// failures are retried with exponential backoff up to
    /// `RetryConfig::max_attempts` total attempts; other failures return
    /// immediately. The caller's `deadline` bounds only this caller's wait.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        service: &str,
        deadline: Option<Instant>,
        make_request: F,
    ) -> Result<T, UpstreamError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let limiter = Arc::clone(&self.limiter);
        let retry = self.retry.clone();
        let service_name = service.to_string();

        self.flights
            .run(key, service, deadline, move || {
                run_with_retries(limiter, retry, service_name, make_request)
            })
            .await
    }
}

async fn run_with_retries<T, F, Fut>(
    limiter: Arc<RateLimiterRegistry>,
    retry: RetryConfig,
    service: String,
    make_request: F,
) -> Result<T, UpstreamError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        limiter.wait(&service, None).await?;

        match make_request().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(service = %service, attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                tracing::warn!(service = %service, attempt, error = %err, "request failed, not retrying");
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                tracing::error!(service = %service, attempt, error = %err, "request failed, retries exhausted");
                return Err(UpstreamError::RetriesExhausted {
                    service,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                attempt += 1;
                let delay = retry.backoff_for(attempt);
                tracing::info!(
                    service = %service,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmgate_core::RateLimit;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn status(code: u16) -> UpstreamError {
        UpstreamError::Status {
            service: "svc".to_string(),
            status: code,
            message: "nope".to_string(),
        }
    }

    fn executor() -> RequestExecutor<u32> {
        RequestExecutor::new(Arc::new(RateLimiterRegistry::new()), RetryConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_with_growing_delay() {
        let exec = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let seen_at = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let (c, s) = (Arc::clone(&calls), Arc::clone(&seen_at));
        let result = exec
            .execute("k", "svc", None, move || {
                let c = Arc::clone(&c);
                let s = Arc::clone(&s);
                async move {
                    s.lock().expect("lock").push(Instant::now() - start);
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(status(503))
                    } else {
                        Ok(9)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let seen = seen_at.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1500)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_wraps_last_error() {
        let exec = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = exec
            .execute("k", "svc", None, move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(if n == 2 { status(502) } else { status(500) })
                }
            })
            .await;

        match result {
            Err(UpstreamError::RetriesExhausted {
                service,
                attempts,
                last,
            }) => {
                assert_eq!(service, "svc");
                assert_eq!(attempts, 3);
                assert_eq!(*last, status(502));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_errors_are_not_retried() {
        let exec = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = exec
            .execute("k", "svc", None, move || {
                c.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(UpstreamError::Parse {
                        service: "svc".to_string(),
                        reason: "bad json".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(UpstreamError::Parse { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_backoff() {
        let exec = executor();
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = exec
            .execute("k", "svc", Some(deadline), || async { Err(status(503)) })
            .await;

        assert!(matches!(result, Err(UpstreamError::Timeout { .. })));
        assert_eq!(Instant::now(), deadline);
    }

    #[tokio::test]
    async fn test_each_attempt_waits_for_rate_limit() {
        let limiter = Arc::new(RateLimiterRegistry::new());
        limiter.reconfigure("svc", RateLimit::new(10.0, 1));
        let exec: RequestExecutor<u32> = RequestExecutor::new(
            limiter,
            RetryConfig {
                initial_backoff: Duration::from_millis(10),
                ..RetryConfig::default()
            },
        );
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = exec
            .execute("k", "svc", None, move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(status(500))
                    } else {
                        Ok(1)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(1));
        // Backoff is 10ms but the second token only arrives after 100ms.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(95), "waited {waited:?}");
        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_rate_limit_timeout_is_distinct_from_upstream_failure() {
        let limiter = Arc::new(RateLimiterRegistry::new());
        limiter.reconfigure("svc", RateLimit::new(0.1, 1));
        assert!(limiter.try_acquire("svc"));

        let exec: RequestExecutor<u32> = RequestExecutor::new(limiter, RetryConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let deadline = Instant::now() + Duration::from_millis(50);
        let result = exec
            .execute("k", "svc", Some(deadline), move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(5) }
            })
            .await;

        assert!(matches!(result, Err(UpstreamError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
