//! Background task that periodically purges expired entries.

use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::TtlCache;

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // A cancelled task reports a JoinError; that's the expected outcome.
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Spawn a task that calls [`TtlCache::purge_expired`] every `interval`.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    tracing::debug!("cache dropped, sweeper exiting");
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "swept expired entries");
                }
            }
        });

        SweeperHandle { task: Some(task) }
    }
}
