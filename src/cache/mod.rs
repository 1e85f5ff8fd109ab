//! Report cache backends.
//!
//! The cache is an acceleration layer in front of the research engine:
//! a hit within the TTL window serves a previously computed report
//! without an engine invocation. It is never the system of record --
//! that is the [result store](crate::store) -- so every backend is
//! allowed to lose data, and the registry treats any cache error as a
//! miss.
//!
//! Two backends ship with the crate:
//! - [`MemoryCache`]: in-process, `DashMap`-backed, for single-node
//!   deployments and tests.
//! - `RedisCache` (behind the `redis` cargo feature): shared across
//!   processes, TTL enforced server-side.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::types::ResearchReport;

/// Errors from cache backends.
///
/// The registry never propagates these to callers: a cache error is a
/// miss plus a warning.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend cannot be reached or answered with an error.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Cache tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// When `false`, the registry skips cache reads and writes entirely.
    pub enabled: bool,
    /// How long a cached report is served before expiring.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Storage backend for cached reports.
///
/// Backends are dumb key-value stores keyed by request fingerprint. All
/// interpretation (when to read, what a miss means, whether to cache a
/// result at all) lives in the registry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetches the report cached under `key`.
    ///
    /// Returns `Ok(None)` on a miss. An entry past its TTL is a miss on
    /// every backend.
    async fn get(&self, key: &str) -> Result<Option<ResearchReport>, CacheError>;

    /// Caches `report` under `key` for `ttl`.
    ///
    /// Overwrites any existing entry and resets its expiry.
    async fn set(&self, key: &str, report: &ResearchReport, ttl: Duration)
        -> Result<(), CacheError>;

    /// Removes the entry under `key`.
    ///
    /// Returns `true` if an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}
