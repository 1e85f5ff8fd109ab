//! Single-flight task and cache layer for research-report generation.
//!
//! This crate sits between a serving surface and a slow, costly research
//! engine. It deduplicates concurrent invocations for semantically
//! identical requests, tracks asynchronous task lifecycle for polling,
//! serves previously computed reports within a TTL window, and durably
//! persists completed reports independent of the cache.
//!
//! # Overview
//!
//! A request is identified by its fingerprint: a SHA-256 over the
//! normalized query, report type, and tone. Submitting a request either
//! starts a new task or joins the one already in flight for that
//! fingerprint -- the engine runs at most once per fingerprint at a
//! time. Tasks progress through a monotonic state machine
//! (`queued -> processing -> completed | failed`) observable by polling
//! or by subscription.
//!
//! # Module Organization
//!
//! - [`types`] - Task statuses, requests, reports, snapshots
//! - [`error`] - Rich error types with context fields
//! - [`fingerprint`] - Deterministic request fingerprinting
//! - [`engine`] - The [`ResearchEngine`] seam and retry policy
//! - [`cache`] - TTL cache backends (in-process; Redis behind the
//!   `redis` feature)
//! - [`store`] - Durable result storage (filesystem implementation)
//! - [`registry`] - The single-flight [`TaskRegistry`]
//!
//! # Logging
//!
//! The crate emits structured `tracing` events and installs no
//! subscriber; the host application decides where they go.

pub mod cache;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod registry;
pub mod store;
pub mod types;

// Re-exports for ergonomic access
pub use engine::{EngineError, ResearchEngine, RetryPolicy};
pub use error::TaskError;
pub use fingerprint::fingerprint;
pub use registry::{RegistryConfig, SubmitReceipt, TaskRegistry, TaskWaiter};
pub use types::{
    CostBreakdown, FailureKind, ReportRequest, ReportType, ResearchReport, Source, TaskFailure,
    TaskSnapshot, TaskState, TaskStatus, Tone,
};
