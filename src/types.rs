//! Core types for research tasks and reports.
//!
//! This module defines the task lifecycle status ([`TaskStatus`]), the
//! request shape accepted by the registry ([`ReportRequest`]), the durable
//! output document ([`ResearchReport`]), and the read-only view returned
//! by status queries ([`TaskSnapshot`]).
//!
//! # Serialization
//!
//! Statuses, report types, and tones serialize as `snake_case` strings.
//! Report documents serialize with `camelCase` field naming, matching the
//! JSON files the store writes to disk.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Task lifecycle status.
///
/// A task progresses through a strictly monotonic state machine. Terminal
/// states (`Completed`, `Failed`) reject all transitions, and
/// self-transitions are rejected, so the sequence of statuses any observer
/// can see is a prefix of `queued, processing, completed` or
/// `queued, processing, failed` -- never anything else.
///
/// # State Machine
///
/// ```text
/// Queued -> Processing
/// Processing -> Completed | Failed
/// Completed -> (terminal, no transitions)
/// Failed -> (terminal, no transitions)
/// ```
///
/// # Examples
///
/// ```
/// use research_tasks::TaskStatus;
///
/// let status = TaskStatus::Processing;
/// assert!(!status.is_terminal());
/// assert!(status.can_transition_to(&TaskStatus::Completed));
/// assert!(!status.can_transition_to(&TaskStatus::Queued));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been registered but its executor has not started yet.
    Queued,
    /// The executor is running (cache lookup, engine call, persistence).
    Processing,
    /// Task finished and its report was durably persisted (terminal).
    Completed,
    /// Task failed -- engine error or persistence error (terminal).
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    /// Returns `true` if this status is terminal (no further transitions).
    ///
    /// # Examples
    ///
    /// ```
    /// use research_tasks::TaskStatus;
    ///
    /// assert!(!TaskStatus::Queued.is_terminal());
    /// assert!(!TaskStatus::Processing.is_terminal());
    /// assert!(TaskStatus::Completed.is_terminal());
    /// assert!(TaskStatus::Failed.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    ///
    /// Valid transitions:
    /// - `Queued` -> `Processing`
    /// - `Processing` -> `Completed`, `Failed`
    ///
    /// Terminal states and self-transitions are rejected.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Queued => matches!(next, Self::Processing),
            Self::Processing => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }

    /// Validates a transition from this status to `next`.
    ///
    /// Returns [`TaskError::InvalidTransition`] with context about the
    /// rejected transition.
    ///
    /// # Examples
    ///
    /// ```
    /// use research_tasks::TaskStatus;
    ///
    /// assert!(TaskStatus::Queued
    ///     .validate_transition("task-1", &TaskStatus::Processing)
    ///     .is_ok());
    /// assert!(TaskStatus::Completed
    ///     .validate_transition("task-1", &TaskStatus::Processing)
    ///     .is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id: task_id.to_string(),
                from: *self,
                to: *next,
            })
        }
    }
}

/// The kind of report the engine should produce.
///
/// Distinct report types for the same query yield distinct artifacts, so
/// the fingerprint covers this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// Standard research report (the default).
    ResearchReport,
    /// Longer report with per-subtopic sections.
    DetailedReport,
    /// Outline only.
    OutlineReport,
    /// Annotated list of sources.
    ResourceReport,
}

impl ReportType {
    /// Canonical snake_case name, as used in fingerprints and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResearchReport => "research_report",
            Self::DetailedReport => "detailed_report",
            Self::OutlineReport => "outline_report",
            Self::ResourceReport => "resource_report",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writing tone for the produced report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    /// Impartial and unbiased presentation.
    Objective,
    /// Academic register.
    Formal,
    /// Critical evaluation of the material.
    Analytical,
    /// Argues a position.
    Persuasive,
    /// Plain information delivery.
    Informative,
    /// Step-by-step clarification.
    Explanatory,
}

impl Tone {
    /// Canonical snake_case name, as used in fingerprints and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Objective => "objective",
            Self::Formal => "formal",
            Self::Analytical => "analytical",
            Self::Persuasive => "persuasive",
            Self::Informative => "informative",
            Self::Explanatory => "explanatory",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A research request as accepted by the registry.
///
/// The query arrives already validated and sanitized by the upstream
/// input layer; the registry only normalizes it for fingerprinting.
///
/// # Examples
///
/// ```
/// use research_tasks::{ReportRequest, ReportType, Tone};
///
/// let request = ReportRequest::new(
///     "Latest advancements in AI",
///     ReportType::DetailedReport,
///     Tone::Analytical,
/// );
/// assert_eq!(request.report_type, ReportType::DetailedReport);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// The research query text.
    pub query: String,
    /// The kind of report to produce.
    pub report_type: ReportType,
    /// The writing tone.
    pub tone: Tone,
}

impl ReportRequest {
    /// Creates a request from its parts.
    pub fn new(query: impl Into<String>, report_type: ReportType, tone: Tone) -> Self {
        Self {
            query: query.into(),
            report_type,
            tone,
        }
    }
}

/// A single source consulted while producing a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Source URL.
    pub url: String,
    /// Page or document title, when the engine could extract one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Cost incurred while producing a report, split by phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    /// Cost of the web-research phase in USD.
    pub research_usd: f64,
    /// Cost of the report-writing phase in USD.
    pub writing_usd: f64,
}

impl CostBreakdown {
    /// Total cost across all phases.
    pub fn total_usd(&self) -> f64 {
        self.research_usd + self.writing_usd
    }
}

/// The durable output of a completed research task.
///
/// One `ResearchReport` is produced per successful engine invocation,
/// written once to the result store, and served to every waiter on the
/// task and to cache hits within the TTL window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchReport {
    /// Unique report identifier (UUIDv4). Doubles as the store key.
    pub report_id: String,
    /// The query this report answers.
    pub query: String,
    /// The kind of report produced.
    pub report_type: ReportType,
    /// The writing tone used.
    pub tone: Tone,
    /// The report body (markdown).
    pub content: String,
    /// Sources in the order the engine consulted them.
    pub sources: Vec<Source>,
    /// Cost incurred producing this report.
    pub cost_breakdown: CostBreakdown,
    /// Where the report was durably persisted. `None` until the store
    /// accepts the write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    /// When the engine finished producing this report.
    pub completed_at: DateTime<Utc>,
}

impl ResearchReport {
    /// Creates a report for `request` with a fresh report id and the
    /// current completion timestamp. `storage_location` starts unset and
    /// is filled in once the store accepts the write.
    pub fn new(
        request: &ReportRequest,
        content: impl Into<String>,
        sources: Vec<Source>,
        cost_breakdown: CostBreakdown,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4().to_string(),
            query: request.query.clone(),
            report_type: request.report_type,
            tone: request.tone,
            content: content.into(),
            sources,
            cost_breakdown,
            storage_location: None,
            completed_at: Utc::now(),
        }
    }
}

/// Why a task finished in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine failed permanently or exhausted its retries.
    Engine,
    /// The engine produced a report but durable persistence failed.
    Storage,
    /// The task was torn down before finishing: deleted, registry
    /// shutdown, or reclaimed as idle.
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::Storage => write!(f, "storage"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Terminal failure details for a task.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Which stage failed.
    pub kind: FailureKind,
    /// Retained error message from the failing stage.
    pub message: String,
    /// Present only for [`FailureKind::Storage`]: the report was computed
    /// but could not be persisted, so the in-memory copy is surfaced to
    /// the waiters that are currently attached.
    pub report: Option<Arc<ResearchReport>>,
}

/// The published lifecycle state of a task.
///
/// Fanned out to waiters through a `tokio::sync::watch` channel, so late
/// subscribers always observe the latest (possibly terminal) state.
#[derive(Debug, Clone)]
pub enum TaskState {
    /// Registered, executor not yet running.
    Queued,
    /// Executor running.
    Processing,
    /// Finished; the report is durably persisted.
    Completed(Arc<ResearchReport>),
    /// Finished unsuccessfully.
    Failed(TaskFailure),
}

impl TaskState {
    /// The status corresponding to this state.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Queued => TaskStatus::Queued,
            Self::Processing => TaskStatus::Processing,
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
        }
    }

    /// Returns `true` if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Read-only view of a task, as returned by status queries.
///
/// Snapshots never block on the underlying engine call: they are taken
/// from the task's watch channel and entry metadata.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    /// The externally visible task id the caller queried with.
    pub task_id: String,
    /// The fingerprint of the underlying shared task.
    pub fingerprint: String,
    /// Current status.
    pub status: TaskStatus,
    /// When the underlying task was created.
    pub created_at: DateTime<Utc>,
    /// When the underlying task last changed state.
    pub updated_at: DateTime<Utc>,
    /// Number of callers currently attached to the task.
    pub waiters: usize,
    /// The report, present only when `status` is `Completed`.
    pub report: Option<Arc<ResearchReport>>,
    /// Failure details, present only when `status` is `Failed`.
    pub failure: Option<TaskFailure>,
}
