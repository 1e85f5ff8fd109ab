//! Durable result storage.
//!
//! The result store is the system of record for completed reports. It
//! has no TTL: a report lives until it is explicitly deleted, and it
//! survives cache eviction and process restarts. The cache is only an
//! acceleration layer in front of this store.

mod fs;

pub use fs::FileResultStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ReportType, ResearchReport, Tone};

/// Errors from the result store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No report exists under the given id.
    #[error("report not found: {report_id}")]
    NotFound {
        /// The report id that was not found.
        report_id: String,
    },

    /// An I/O failure while reading or writing the store.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A report document could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A listing entry: the report's identity and metadata without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// The report id.
    pub report_id: String,
    /// The query the report answers.
    pub query: String,
    /// The kind of report.
    pub report_type: ReportType,
    /// The writing tone.
    pub tone: Tone,
    /// When the report was completed.
    pub completed_at: DateTime<Utc>,
    /// Where the full document lives.
    pub storage_location: String,
}

/// Durable storage for completed reports.
///
/// Implementations must make `put` atomic: a concurrent reader sees
/// either the complete report or nothing, never a partial document.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persists `report` and returns its storage location.
    ///
    /// Writing the same report id again overwrites the previous
    /// document.
    async fn put(&self, report: &ResearchReport) -> Result<String, StoreError>;

    /// Fetches the report stored under `report_id`.
    async fn get(&self, report_id: &str) -> Result<ResearchReport, StoreError>;

    /// Lists stored reports, newest first by completion time.
    ///
    /// `offset` skips that many reports from the newest end; `limit`
    /// caps the page size. The ordering is stable under concurrent
    /// writes: a write during listing may or may not appear, but never
    /// corrupts the page.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ReportSummary>, StoreError>;

    /// Deletes the report stored under `report_id`.
    ///
    /// Returns `true` if a report existed.
    async fn delete(&self, report_id: &str) -> Result<bool, StoreError>;
}

impl From<&ResearchReport> for ReportSummary {
    fn from(report: &ResearchReport) -> Self {
        Self {
            report_id: report.report_id.clone(),
            query: report.query.clone(),
            report_type: report.report_type,
            tone: report.tone,
            completed_at: report.completed_at,
            storage_location: report.storage_location.clone().unwrap_or_default(),
        }
    }
}
