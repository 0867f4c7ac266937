//! Validated-claim cache keyed by raw bearer token.
//!
//! Entries are inserted after a token passes full verification and are
//! evicted lazily when a hit fails its time check, or in bulk by the
//! background sweeper. The token string is used as an opaque key and is
//! never reparsed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::claims::{Claims, unix_now};

/// Thread-safe token → claims cache
pub struct ClaimCache {
    entries: DashMap<String, Arc<Claims>>,
    /// 0 means unbounded
    max_entries: usize,
    stats: CacheStats,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups with no entry
    pub misses: u64,
    /// Entries removed because they expired
    pub evictions: u64,
    /// Inserts refused because the cache was full
    pub rejected: u64,
    /// Current number of entries
    pub size: usize,
}

impl ClaimCache {
    /// Create an unbounded cache
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity_limit(0)
    }

    /// Create a cache holding at most `max_entries` tokens (0 = unbounded)
    #[must_use]
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Look up claims for a raw token. Does not check expiry.
    pub fn get(&self, token: &str) -> Option<Arc<Claims>> {
        if let Some(entry) = self.entries.get(token) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(entry.value()))
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store claims for a raw token.
    ///
    /// When the cache is bounded and full, expired entries are swept first;
    /// if it is still full the insert is dropped.
    pub fn insert(&self, token: &str, claims: Arc<Claims>) {
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(token)
        {
            self.sweep_expired(unix_now());
            if self.entries.len() >= self.max_entries {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(max = self.max_entries, "Claim cache full, not caching token");
                return;
            }
        }
        self.entries.insert(token.to_string(), claims);
    }

    /// Remove a token. Returns `true` if it was cached.
    pub fn evict(&self, token: &str) -> bool {
        let removed = self.entries.remove(token).is_some();
        if removed {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every entry whose claims are no longer valid at `now`.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, claims| claims.check_validity(now).is_ok());
        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of cached tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `token` has an entry
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    /// Snapshot of the cache counters
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

impl Default for ClaimCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that sweeps expired claims every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    cache: Arc<ClaimCache>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = cache.sweep_expired(unix_now());
                    if swept > 0 {
                        debug!(count = swept, "Swept expired claims");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Claim sweeper shutting down");
                    break;
                }
            }
        }
    })
}
