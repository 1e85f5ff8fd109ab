//! In-process cache backend.
//!
//! [`MemoryCache`] stores reports in a `DashMap` keyed by fingerprint.
//! Expiry is enforced lazily on read; [`MemoryCache::cleanup_expired`]
//! exists for a background sweep so dead entries do not accumulate
//! between reads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::cache::{CacheBackend, CacheError};
use crate::types::ResearchReport;

#[derive(Debug, Clone)]
struct CachedReport {
    report: ResearchReport,
    expires_at: Instant,
}

/// Thread-safe in-process cache using [`DashMap`].
///
/// # Concurrency
///
/// `DashMap` provides fine-grained shard-level locking; no operation
/// takes a whole-map lock.
///
/// # Examples
///
/// ```
/// use research_tasks::cache::MemoryCache;
///
/// let cache = MemoryCache::new();
/// assert!(cache.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedReport>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry and returns how many were removed.
    ///
    /// Reads already treat expired entries as misses; this reclaims
    /// their memory.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.expires_at > now);
        before - self.entries.len()
    }

    /// Starts a background loop that reclaims expired entries every
    /// `interval`. Runs until the returned handle is aborted; keys that
    /// are never read again still get cleaned up.
    pub fn run_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired cache entries");
                }
            }
        })
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<ResearchReport>, CacheError> {
        let expired = match self.entries.get(key) {
            Some(cached) => {
                if cached.expires_at > Instant::now() {
                    return Ok(Some(cached.report.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            // The read guard is released; a concurrent set may have
            // refreshed the entry, so only remove it if still expired.
            self.entries
                .remove_if(key, |_, cached| cached.expires_at <= Instant::now());
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        report: &ResearchReport,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            CachedReport {
                report: report.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }
}
