//! Redis cache backend (feature `redis`).
//!
//! [`RedisCache`] stores one Redis string per fingerprint, the JSON
//! serialization of the report, with expiry enforced server-side via
//! `SET ... EX`. Keys are `{prefix}:report:{fingerprint}`.
//!
//! # Connection Model
//!
//! Holds a [`MultiplexedConnection`], which is designed to be cloned
//! cheaply -- all clones share the same underlying TCP connection. Each
//! method clones the connection for concurrent safety.
//!
//! # Degradation
//!
//! Every Redis failure maps to [`CacheError::Unavailable`]. The registry
//! treats that as a miss, so a Redis outage slows requests down (engine
//! re-invocations) but never fails them.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;

use crate::cache::{CacheBackend, CacheError};
use crate::types::ResearchReport;

/// Redis-backed report cache.
///
/// # Examples
///
/// ```rust,no_run
/// use research_tasks::cache::RedisCache;
///
/// # async fn example() {
/// let cache = RedisCache::new("redis://127.0.0.1:6379")
///     .await
///     .unwrap()
///     .with_prefix("research-test");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisCache {
    /// Connects to Redis at the given URL.
    ///
    /// The URL format is `redis://[:<password>@]<host>:<port>[/<db>]`.
    /// Uses the default key prefix `"research"`. Fails fast if the
    /// connection cannot be established.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the client cannot be
    /// created or the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("failed to create Redis client: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to Redis: {e}")))?;
        Ok(Self {
            conn,
            key_prefix: "research".to_string(),
        })
    }

    /// Creates a cache with a pre-built multiplexed connection.
    ///
    /// Useful when the caller manages connection lifecycle or needs
    /// custom connection configuration.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            key_prefix: "research".to_string(),
        }
    }

    /// Sets a custom key prefix (builder pattern).
    ///
    /// Useful for test isolation: each test run can use a unique prefix
    /// to avoid key collisions.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn report_key(&self, fingerprint: &str) -> String {
        report_key(&self.key_prefix, fingerprint)
    }
}

fn report_key(prefix: &str, fingerprint: &str) -> String {
    format!("{prefix}:report:{fingerprint}")
}

fn map_redis_error(err: ::redis::RedisError, key: &str) -> CacheError {
    CacheError::Unavailable(format!("Redis error for key {key}: {err}"))
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<ResearchReport>, CacheError> {
        let redis_key = self.report_key(key);
        let mut conn = self.conn.clone();

        let payload: Option<String> = conn
            .get(&redis_key)
            .await
            .map_err(|e| map_redis_error(e, &redis_key))?;

        match payload {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Serialization(format!("decoding key {redis_key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        report: &ResearchReport,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let redis_key = self.report_key(key);
        let payload = serde_json::to_string(report)
            .map_err(|e| CacheError::Serialization(format!("encoding key {redis_key}: {e}")))?;
        // SET ... EX of at least one second; sub-second TTLs round up.
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&redis_key, payload, ttl_secs)
            .await
            .map_err(|e| map_redis_error(e, &redis_key))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let redis_key = self.report_key(key);
        let mut conn = self.conn.clone();

        let removed: u64 = conn
            .del(&redis_key)
            .await
            .map_err(|e| map_redis_error(e, &redis_key))?;
        Ok(removed > 0)
    }
}
