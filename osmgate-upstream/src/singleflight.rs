//! Single-flight request coalescing.
//!
//! At most one computation runs per key. Callers arriving while it is in
//! flight attach to it and receive a clone of the same outcome. The work runs
//! on its own task so that a caller giving up does not cancel it for the
//! others; the task is aborted only once every waiter has left.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use osmgate_core::UpstreamError;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

type Outcome<T> = Option<Result<T, UpstreamError>>;

struct Flight<T> {
    rx: watch::Receiver<Outcome<T>>,
    waiters: AtomicUsize,
    abort: OnceLock<AbortHandle>,
}

type FlightMap<T> = DashMap<String, Arc<Flight<T>>>;

/// Registry of in-flight computations keyed by deduplication key.
pub struct SingleFlight<T> {
    flights: Arc<FlightMap<T>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a computation currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `work` for `key`, or join the computation already running for it.
    ///
    /// `work` is only invoked by the caller that starts a new flight. Each
    /// caller honors its own `deadline` and fails with
    /// [`UpstreamError::Timeout`] when it passes; the shared computation keeps
    /// going while anyone else still waits on it.
    pub async fn run<F, Fut>(
        &self,
        key: &str,
        service: &str,
        deadline: Option<Instant>,
        work: F,
    ) -> Result<T, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let flight = self.join_or_start(key, work);
        let _guard = WaiterGuard {
            flights: &self.flights,
            key,
            flight: &flight,
        };

        let mut rx = flight.rx.clone();
        let received = {
            let changed = rx.wait_for(Option::is_some);
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, changed).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(key, service, "coalesced caller deadline elapsed");
                        return Err(UpstreamError::Timeout {
                            service: service.to_string(),
                        });
                    }
                },
                None => changed.await,
            };
            result.ok().and_then(|outcome| (*outcome).clone())
        };

        // A closed channel with no value means the task died before publishing.
        received.unwrap_or_else(|| {
            Err(UpstreamError::Cancelled {
                service: service.to_string(),
            })
        })
    }

    fn join_or_start<F, Fut>(&self, key: &str, work: F) -> Arc<Flight<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let flight = Arc::clone(entry.get());
                flight.waiters.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(key, "joined in-flight request");
                flight
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                let flight = Arc::new(Flight {
                    rx,
                    waiters: AtomicUsize::new(1),
                    abort: OnceLock::new(),
                });

                let cleanup = FlightCleanup {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    flight: Arc::clone(&flight),
                };
                let fut = work();
                // Spawned while the entry is still vacant-locked, so the task's
                // own cleanup can never run before the flight is registered.
                let handle = tokio::spawn(async move {
                    let _cleanup = cleanup;
                    let result = fut.await;
                    tx.send_replace(Some(result));
                });
                let _ = flight.abort.set(handle.abort_handle());

                entry.insert(Arc::clone(&flight));
                flight
            }
        }
    }
}

/// Deregisters the flight when its task ends, however it ends.
struct FlightCleanup<T> {
    flights: Arc<FlightMap<T>>,
    key: String,
    flight: Arc<Flight<T>>,
}

impl<T> Drop for FlightCleanup<T> {
    fn drop(&mut self) {
        self.flights
            .remove_if(&self.key, |_, f| Arc::ptr_eq(f, &self.flight));
    }
}

/// Counts one waiter out; the last one out tears the flight down.
struct WaiterGuard<'a, T> {
    flights: &'a FlightMap<T>,
    key: &'a str,
    flight: &'a Arc<Flight<T>>,
}

impl<T> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        // Decrement under the shard lock so a concurrent join can't slip in
        // between "count hit zero" and "entry removed".
        let removed = self.flights.remove_if(self.key, |_, f| {
            Arc::ptr_eq(f, self.flight) && f.waiters.fetch_sub(1, Ordering::SeqCst) == 1
        });

        if removed.is_some() {
            if let Some(handle) = self.flight.abort.get() {
                if !handle.is_finished() {
                    tracing::debug!(key = self.key, "last waiter left, aborting request");
                }
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn service_error(message: &str) -> UpstreamError {
        UpstreamError::Status {
            service: "test".to_string(),
            status: 503,
            message: message.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_call() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run("k", "test", None, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("join").expect("shared result"), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let first = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run("k", "test", None, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(service_error("down"))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = flights
            .run("k", "test", None, || async { Ok(1) })
            .await;

        assert_eq!(second, Err(service_error("down")));
        assert_eq!(first.await.expect("join"), Err(service_error("down")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_run_separately() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let a = flights.run("k", "test", None, || async { Ok(1) }).await;
        let b = flights.run("k", "test", None, || async { Ok(2) }).await;
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_caller_timing_out_does_not_cancel_others() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicU32::new(0));

        let patient = {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flights
                    .run("k", "test", None, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(7)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let impatient = flights
            .run(
                "k",
                "test",
                Some(Instant::now() + Duration::from_millis(100)),
                || async { Ok(0) },
            )
            .await;
        assert!(matches!(impatient, Err(UpstreamError::Timeout { .. })));

        assert_eq!(patient.await.expect("join"), Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_waiter_leaving_aborts_work() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let finished = Arc::new(AtomicU32::new(0));

        let marker = Arc::clone(&finished);
        let result = flights
            .run(
                "k",
                "test",
                Some(Instant::now() + Duration::from_millis(10)),
                move || async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    marker.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
            )
            .await;
        assert!(matches!(result, Err(UpstreamError::Timeout { .. })));
        assert_eq!(flights.in_flight(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
