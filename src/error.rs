//! Error types for registry operations.
//!
//! Provides [`TaskError`], a rich error enum with context fields, plus a
//! retryability hint for callers that poll.

use std::fmt;

use crate::types::{FailureKind, TaskStatus};

/// Errors returned by [`TaskRegistry`](crate::registry::TaskRegistry)
/// operations.
///
/// Each variant carries contextual information (task id, statuses, the
/// failing stage) to aid debugging. Cache problems never appear here:
/// the registry degrades cache errors to misses and logs them instead.
///
/// # Examples
///
/// ```
/// use research_tasks::TaskError;
///
/// let err = TaskError::NotFound {
///     task_id: "missing-task".to_string(),
/// };
/// assert!(err.to_string().contains("missing-task"));
/// ```
#[derive(Debug)]
pub enum TaskError {
    /// Attempted an invalid state machine transition.
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: String,
        /// The current status of the task.
        from: TaskStatus,
        /// The target status that was rejected.
        to: TaskStatus,
    },

    /// Task with the given id was not found.
    NotFound {
        /// The task id that was not found.
        task_id: String,
    },

    /// Task is not in a terminal state yet (needed for fetching a
    /// result directly).
    NotReady {
        /// The task id.
        task_id: String,
        /// The task's current (non-terminal) status.
        current_status: TaskStatus,
    },

    /// The task reached a terminal failure.
    TaskFailed {
        /// The task id.
        task_id: String,
        /// Which stage failed, or that the task was aborted.
        kind: FailureKind,
        /// Retained message from the failing stage.
        message: String,
    },

    /// The registry is shutting down and no longer accepts work.
    ShuttingDown,

    /// Durable store error during a direct store operation
    /// (listing or deleting reports).
    StoreError(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { task_id, from, to } => write!(
                f,
                "invalid transition from {from} to {to} for task {task_id}"
            ),
            Self::NotFound { task_id } => write!(f, "task not found: {task_id}"),
            Self::NotReady {
                task_id,
                current_status,
            } => write!(
                f,
                "task not in terminal state: {task_id} (status: {current_status})"
            ),
            Self::TaskFailed {
                task_id,
                kind,
                message,
            } => write!(f, "task {task_id} failed ({kind}): {message}"),
            Self::ShuttingDown => write!(f, "registry is shutting down"),
            Self::StoreError(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl TaskError {
    /// Returns `true` if resubmitting the same request may succeed.
    ///
    /// Engine failures and store errors are worth retrying; a rejected
    /// transition or an unknown id is not.
    ///
    /// # Examples
    ///
    /// ```
    /// use research_tasks::{FailureKind, TaskError};
    ///
    /// let err = TaskError::TaskFailed {
    ///     task_id: "t1".to_string(),
    ///     kind: FailureKind::Engine,
    ///     message: "rate limited".to_string(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// let err = TaskError::NotFound {
    ///     task_id: "t1".to_string(),
    /// };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TaskFailed { .. } | Self::StoreError(_) => true,
            Self::InvalidTransition { .. }
            | Self::NotFound { .. }
            | Self::NotReady { .. }
            | Self::ShuttingDown => false,
        }
    }
}
