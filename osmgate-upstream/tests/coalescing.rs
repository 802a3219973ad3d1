//! Request coalescing under real multi-threaded contention.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use osmgate_core::{RateLimit, RetryConfig, UpstreamError};
use osmgate_upstream::{RateLimiterRegistry, RequestExecutor};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_requests_issue_one_call() {
    let limiter = Arc::new(RateLimiterRegistry::new());
    limiter.reconfigure("svc", RateLimit::new(100.0, 100));
    let executor: Arc<RequestExecutor<String>> =
        Arc::new(RequestExecutor::new(limiter, RetryConfig::default()));
    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(tokio::sync::Notify::new());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let executor = Arc::clone(&executor);
        let calls = Arc::clone(&calls);
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            executor
                .execute("chiang rai", "svc", None, move || {
                    let calls = Arc::clone(&calls);
                    let gate = Arc::clone(&gate);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, UpstreamError>("19.9,99.8".to_string())
                    }
                })
                .await
        }));
    }

    // Wait for the single leader to start, then let every caller pile on.
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.notify_waiters();

    for handle in handles {
        let result = handle.await.expect("task should not panic");
        assert_eq!(result.expect("shared success"), "19.9,99.8");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_are_not_coalesced() {
    let executor: Arc<RequestExecutor<u32>> = Arc::new(RequestExecutor::new(
        Arc::new(RateLimiterRegistry::new()),
        RetryConfig::default(),
    ));
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for i in 0..10u32 {
        let executor = Arc::clone(&executor);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            executor
                .execute(&format!("key-{i}"), "svc", None, move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(i)
                    }
                })
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.expect("join"), Ok(i as u32));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}
