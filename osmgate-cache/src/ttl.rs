//! Bounded key/value store with per-entry expiration.
//!
//! Correctness never depends on the background sweeper: `get` checks the
//! expiry itself and removes an expired entry it stumbles on.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use osmgate_core::CachePolicy;
use tokio::time::Instant;

use crate::stats::CacheStats;

/// A cached value and when it stops being visible.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Eviction order: earliest expiry first, non-expiring entries last.
fn eviction_order(a: Option<Instant>, b: Option<Instant>) -> CmpOrdering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

/// Thread-safe TTL cache.
///
/// Reads take the shared lock; a lazily discovered expired entry upgrades to
/// the write lock to remove it. None of the operations can fail: a full
/// cache evicts instead.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    /// Maximum number of entries; zero means unbounded.
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (zero = unbounded)
    /// with `default_ttl` applied by [`TtlCache::set`] (zero = never expires).
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_policy(policy: &CachePolicy) -> Self {
        Self::new(policy.capacity, policy.ttl)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` under `key`, overwriting any previous entry.
    ///
    /// A zero `ttl` means the entry never expires on its own.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        let mut entries = self.write();
        entries.insert(key, CacheEntry { value, expires_at });

        if self.capacity > 0 && entries.len() > self.capacity {
            let evicted = Self::evict_excess(&mut entries, self.capacity);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, capacity = self.capacity, "cache over capacity");
        }
    }

    /// Remove enough entries to get back to `capacity`, oldest-expiring first.
    fn evict_excess(entries: &mut HashMap<K, CacheEntry<V>>, capacity: usize) -> usize {
        let excess = entries.len().saturating_sub(capacity);
        if excess == 0 {
            return 0;
        }

        let mut by_expiry: Vec<(K, Option<Instant>)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.expires_at))
            .collect();
        by_expiry.sort_by(|a, b| eviction_order(a.1, b.1));

        for (key, _) in by_expiry.into_iter().take(excess) {
            entries.remove(&key);
        }
        excess
    }

    /// Look up `key`, returning `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.read();
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: upgrade and re-check, a writer may have replaced it meanwhile.
        let mut entries = self.write();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether `key` is present and unexpired. Does not touch hit counters.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.read().get(key).is_some_and(|e| !e.is_expired(now))
    }

    pub fn delete(&self, key: &K) -> Option<V> {
        self.write().remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry whose expiration has passed. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .read()
            .map(|e| e.len())
            .unwrap_or_default();
        f.debug_struct("TtlCache")
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .field("current_size", &len)
            .finish()
    }
}
