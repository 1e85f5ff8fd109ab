//! Filesystem result store.
//!
//! One JSON document per report under a configured directory, named
//! `{report_id}.json`. Writes go to `{report_id}.json.tmp` first and are
//! committed with an atomic rename, so a concurrent reader sees either
//! the complete document or nothing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::store::{ReportSummary, ResultStore, StoreError};
use crate::types::ResearchReport;

/// Filesystem-backed report store.
///
/// # Examples
///
/// ```rust,no_run
/// use research_tasks::store::FileResultStore;
///
/// # async fn example() -> Result<(), research_tasks::store::StoreError> {
/// let store = FileResultStore::new("./outputs").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// The directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves the document path for a report id.
    ///
    /// Ids are UUIDs generated by this crate, but deletes can arrive
    /// with caller-supplied ids, so anything that could escape the
    /// store directory is rejected as not-found.
    fn report_path(&self, report_id: &str) -> Result<PathBuf, StoreError> {
        if report_id.is_empty()
            || !report_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(StoreError::NotFound {
                report_id: report_id.to_string(),
            });
        }
        Ok(self.dir.join(format!("{report_id}.json")))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn put(&self, report: &ResearchReport) -> Result<String, StoreError> {
        let path = self.report_path(&report.report_id)?;
        let location = path.to_string_lossy().into_owned();

        // The persisted document records its own location.
        let mut stored = report.clone();
        stored.storage_location = Some(location.clone());
        let payload = serde_json::to_vec_pretty(&stored)?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &payload).await?;
        fs::rename(&tmp_path, &path).await?;

        Ok(location)
    }

    async fn get(&self, report_id: &str) -> Result<ResearchReport, StoreError> {
        let path = self.report_path(report_id)?;
        let payload = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    report_id: report_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ReportSummary>, StoreError> {
        let mut summaries = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Foreign or half-parsed files are skipped, not fatal.
            let Ok(payload) = fs::read(&path).await else {
                continue;
            };
            let Ok(report) = serde_json::from_slice::<ResearchReport>(&payload) else {
                continue;
            };
            summaries.push(ReportSummary::from(&report));
        }

        // Newest first; report id as tiebreak keeps pages stable.
        summaries.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then_with(|| a.report_id.cmp(&b.report_id))
        });

        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, report_id: &str) -> Result<bool, StoreError> {
        let path = self.report_path(report_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
