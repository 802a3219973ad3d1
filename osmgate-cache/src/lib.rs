//! osmgate Cache - bounded in-memory TTL cache
//!
//! A process-local key/value store used to remember geocoding answers.
//! Entries carry their own expiry; when the cache is over capacity the
//! entries closest to expiring are evicted first, and entries that never
//! expire go last. An optional background sweeper reclaims expired entries
//! that nobody reads again.

mod stats;
mod sweeper;
mod ttl;

pub use stats::CacheStats;
pub use sweeper::SweeperHandle;
pub use ttl::TtlCache;
