//! Research engine adapter.
//!
//! The engine is the slow, costly external call this crate exists to
//! deduplicate. [`ResearchEngine`] is the seam: the registry depends on
//! the trait only, and the real engine (or a test double) plugs in
//! behind it.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{ReportRequest, ResearchReport};

/// Errors the engine can report, classified by retryability.
///
/// Transient failures (timeouts, rate limits, network) are retried by
/// the executor according to its [`RetryPolicy`]; permanent failures
/// fail the task immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A failure that may succeed on retry.
    #[error("transient engine error: {0}")]
    Transient(String),

    /// A failure that will not succeed on retry (invalid request,
    /// unsupported content, engine-side rejection).
    #[error("permanent engine error: {0}")]
    Permanent(String),
}

impl EngineError {
    /// Returns `true` if the executor should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A research engine: takes a request, produces a complete report.
///
/// Implementations are expected to be expensive (tens of seconds to
/// minutes) and are never invoked concurrently for the same
/// fingerprint; the registry guarantees single-flight.
#[async_trait]
pub trait ResearchEngine: Send + Sync {
    /// Produces a report for the request.
    ///
    /// Classify failures carefully: only [`EngineError::Transient`]
    /// triggers retries.
    async fn research(&self, request: &ReportRequest) -> Result<ResearchReport, EngineError>;
}

/// Bounded exponential backoff for transient engine failures.
///
/// `max_retries` counts retries after the first attempt, so the default
/// of 3 allows up to 4 total attempts. The delay before retry `n`
/// (1-based) is `base_delay * multiplier^(n-1)`, capped at `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use research_tasks::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_retries, 3);
/// assert_eq!(policy.delay_for(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(2), Duration::from_secs(2));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Exponential growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The delay to sleep before retry number `retry` (1-based).
    ///
    /// Grows exponentially and saturates at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        // Clamp in float space; the factor alone can overflow Duration.
        let secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
