//! Task registry and single-flight executor.
//!
//! [`TaskRegistry`] is the coordination point between callers, the cache,
//! the result store, and the research engine. Its core guarantee is
//! single-flight execution: at most one engine invocation is in flight
//! per request fingerprint, no matter how many callers submit the same
//! request concurrently.
//!
//! # Concurrency
//!
//! Per-fingerprint atomicity comes from the `DashMap` entry API (shard
//! lock, no global lock); the decision to join or create happens inside
//! that critical section and never holds a lock across an `await`. State
//! fan-out uses `tokio::sync::watch`, which retains the last value, so a
//! subscriber that arrives after completion still observes the terminal
//! state.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use research_tasks::cache::MemoryCache;
//! use research_tasks::store::FileResultStore;
//! use research_tasks::{ReportRequest, ReportType, TaskRegistry, Tone};
//! # use research_tasks::{EngineError, ResearchEngine, ResearchReport};
//! # struct Engine;
//! # #[async_trait::async_trait]
//! # impl ResearchEngine for Engine {
//! #     async fn research(&self, _: &ReportRequest) -> Result<ResearchReport, EngineError> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(TaskRegistry::new(
//!     Arc::new(Engine),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(FileResultStore::new("./outputs").await?),
//! ));
//! let sweeper = registry.run_sweeper();
//!
//! let request = ReportRequest::new("rust async", ReportType::ResearchReport, Tone::Objective);
//! let receipt = registry.submit(request)?;
//! let mut waiter = registry.subscribe(&receipt.task_id)?;
//! let final_state = waiter.wait().await;
//! # drop(final_state); sweeper.abort();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{CacheBackend, CacheConfig};
use crate::engine::{EngineError, ResearchEngine, RetryPolicy};
use crate::error::TaskError;
use crate::fingerprint::fingerprint;
use crate::store::{ReportSummary, ResultStore};
use crate::types::{
    FailureKind, ReportRequest, ResearchReport, TaskFailure, TaskSnapshot, TaskState, TaskStatus,
};

/// Registry tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Cache behavior (enabled flag and TTL). The TTL also bounds how
    /// long a completed entry is joinable in the registry.
    pub cache: CacheConfig,
    /// Retry policy for transient engine failures.
    pub retry: RetryPolicy,
    /// A non-terminal task with zero waiters and no progress for this
    /// long is aborted and reclaimed by the sweeper.
    pub idle_timeout: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// What a caller gets back from [`TaskRegistry::submit`].
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// Caller-specific task id; poll or subscribe with this.
    pub task_id: String,
    /// Status at submission time.
    pub status: TaskStatus,
    /// `true` if this submission attached to an existing task instead
    /// of starting new work.
    pub joined: bool,
}

/// One shared task: all callers with the same fingerprint attach here.
struct TaskEntry {
    fingerprint: String,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
    state_tx: watch::Sender<TaskState>,
    waiters: AtomicUsize,
    terminal_at: RwLock<Option<Instant>>,
    /// Most recent sign of life: a state transition or a caller
    /// observing the task. The idle sweep keys off this, so an actively
    /// polled task is never torn down mid-run.
    last_observed: RwLock<Instant>,
    /// Set just before the report is handed to the store, so a delete
    /// racing the completion publish can still find the persisted file.
    pending_report_id: Mutex<Option<String>>,
    run: Mutex<Option<JoinHandle<()>>>,
    task_ids: Mutex<Vec<String>>,
}

impl TaskEntry {
    fn new(fingerprint: String) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            fingerprint,
            created_at: now,
            updated_at: RwLock::new(now),
            state_tx: watch::Sender::new(TaskState::Queued),
            waiters: AtomicUsize::new(0),
            terminal_at: RwLock::new(None),
            last_observed: RwLock::new(Instant::now()),
            pending_report_id: Mutex::new(None),
            run: Mutex::new(None),
            task_ids: Mutex::new(Vec::new()),
        })
    }

    /// Records caller activity for the idle sweep.
    fn touch(&self) {
        *self.last_observed.write() = Instant::now();
    }

    /// Time since the last state change or caller observation.
    fn idle_for(&self) -> Duration {
        self.last_observed.read().elapsed()
    }

    fn status(&self) -> TaskStatus {
        self.state_tx.borrow().status()
    }

    /// Publishes a new state, enforcing the monotonic state machine.
    ///
    /// An invalid transition is dropped with a warning rather than
    /// propagated: by the time an executor races a delete or abort, the
    /// observable state must stay monotonic.
    fn publish(&self, state: TaskState) {
        let current = self.status();
        let next = state.status();
        if !current.can_transition_to(&next) {
            tracing::warn!(
                fingerprint = %self.fingerprint,
                %current,
                %next,
                "dropping invalid status transition"
            );
            return;
        }
        *self.updated_at.write() = Utc::now();
        self.touch();
        if state.is_terminal() {
            *self.terminal_at.write() = Some(Instant::now());
        }
        self.state_tx.send_replace(state);
    }

    /// Terminates a live task: publishes an aborted failure so every
    /// attached waiter resolves, then cancels the executor. A task that
    /// already reached a terminal state keeps it.
    fn abort(&self, reason: &str) {
        if !self.state_tx.borrow().is_terminal() {
            // Keep the observable sequence monotonic: a queued task
            // passes through processing on its way to the failure.
            if self.status() == TaskStatus::Queued {
                self.publish(TaskState::Processing);
            }
            self.publish(TaskState::Failed(TaskFailure {
                kind: FailureKind::Aborted,
                message: reason.to_string(),
                report: None,
            }));
        }
        if let Some(handle) = self.run.lock().take() {
            handle.abort();
        }
    }

    /// A live entry is always joinable. A completed entry is joinable
    /// until `ttl` has elapsed since it reached its terminal state, and
    /// only while result reuse is on. Failed entries are never joinable.
    fn is_joinable(&self, ttl: Duration, reuse_completed: bool) -> bool {
        match &*self.state_tx.borrow() {
            TaskState::Queued | TaskState::Processing => true,
            TaskState::Completed(_) => {
                reuse_completed
                    && self
                        .terminal_at
                        .read()
                        .is_some_and(|at| at.elapsed() < ttl)
            }
            TaskState::Failed(_) => false,
        }
    }

    fn snapshot(&self, task_id: &str) -> TaskSnapshot {
        let state = self.state_tx.borrow().clone();
        let (report, failure) = match &state {
            TaskState::Completed(report) => (Some(Arc::clone(report)), None),
            TaskState::Failed(f) => (None, Some(f.clone())),
            _ => (None, None),
        };
        TaskSnapshot {
            task_id: task_id.to_string(),
            fingerprint: self.fingerprint.clone(),
            status: state.status(),
            created_at: self.created_at,
            updated_at: *self.updated_at.read(),
            waiters: self.waiters.load(Ordering::SeqCst),
            report,
            failure,
        }
    }
}

/// Handle for push-style completion notification.
///
/// Obtained from [`TaskRegistry::subscribe`]. Holding a waiter keeps the
/// task alive: the sweeper never reclaims a task with attached waiters.
/// Dropping the waiter deregisters it.
pub struct TaskWaiter {
    rx: watch::Receiver<TaskState>,
    entry: Arc<TaskEntry>,
}

impl TaskWaiter {
    /// Resolves once the task reaches a terminal state.
    ///
    /// Late subscribers resolve immediately: the watch channel retains
    /// the last published state.
    pub async fn wait(&mut self) -> TaskState {
        loop {
            let state = self.rx.borrow_and_update().clone();
            if state.is_terminal() {
                return state;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone; the retained value is the final word.
                return self.rx.borrow().clone();
            }
        }
    }

    /// The current state, without waiting.
    pub fn current(&self) -> TaskState {
        self.rx.borrow().clone()
    }
}

impl Drop for TaskWaiter {
    fn drop(&mut self) {
        self.entry.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single-flight task registry.
///
/// See the [module docs](self) for the concurrency model and a usage
/// example. Construct with [`new`](TaskRegistry::new), wrap in an
/// [`Arc`], and optionally start [`run_sweeper`](TaskRegistry::run_sweeper).
pub struct TaskRegistry {
    /// fingerprint -> shared task entry.
    tasks: DashMap<String, Arc<TaskEntry>>,
    /// caller task id -> shared task entry.
    ids: DashMap<String, Arc<TaskEntry>>,
    engine: Arc<dyn ResearchEngine>,
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn ResultStore>,
    config: RegistryConfig,
    shutdown: AtomicBool,
}

impl TaskRegistry {
    /// Creates a registry with default configuration.
    pub fn new(
        engine: Arc<dyn ResearchEngine>,
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            tasks: DashMap::new(),
            ids: DashMap::new(),
            engine,
            cache,
            store,
            config: RegistryConfig::default(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Sets the registry configuration (builder pattern).
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of live task entries (shared tasks, not aliases).
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Submits a request, joining an existing task when one is in
    /// flight (or recently completed) for the same fingerprint.
    ///
    /// Exactly one executor runs per new task regardless of how many
    /// callers submit concurrently. The returned task id is unique per
    /// caller; every alias of the same task observes identical states.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub fn submit(self: &Arc<Self>, request: ReportRequest) -> Result<SubmitReceipt, TaskError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(TaskError::ShuttingDown);
        }

        let fp = fingerprint(&request);
        let ttl = self.config.cache.ttl;

        // The join-or-create decision runs under the shard lock for this
        // fingerprint and never awaits; the executor is spawned after.
        let (entry, joined) = match self.tasks.entry(fp.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = Arc::clone(occupied.get());
                if existing.is_joinable(ttl, self.config.cache.enabled) {
                    (existing, true)
                } else {
                    // Failed, expired, or reuse is off: replace with fresh
                    // work. The old
                    // entry's terminal state has already been fanned out.
                    let fresh = TaskEntry::new(fp.clone());
                    occupied.insert(Arc::clone(&fresh));
                    self.release_aliases(&existing);
                    (fresh, false)
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = TaskEntry::new(fp.clone());
                vacant.insert(Arc::clone(&fresh));
                (fresh, false)
            }
        };

        let task_id = Uuid::new_v4().to_string();
        entry.task_ids.lock().push(task_id.clone());
        self.ids.insert(task_id.clone(), Arc::clone(&entry));

        if !joined {
            tracing::debug!(fingerprint = %fp, task_id = %task_id, "starting research task");
            let registry = Arc::clone(self);
            let run_entry = Arc::clone(&entry);
            let handle = tokio::spawn(async move {
                registry.execute(run_entry, request).await;
            });
            *entry.run.lock() = Some(handle);
        } else {
            tracing::debug!(fingerprint = %fp, task_id = %task_id, "joined in-flight task");
        }

        Ok(SubmitReceipt {
            status: entry.status(),
            task_id,
            joined,
        })
    }

    /// Non-blocking status read.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown task id.
    pub fn status(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        let entry = self.entry_for(task_id)?;
        // A poll is a sign of life; it keeps the idle sweep away.
        entry.touch();
        Ok(entry.snapshot(task_id))
    }

    /// Fetches the completed report for a terminal task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] for an unknown task id.
    /// - [`TaskError::NotReady`] while the task is still queued or
    ///   processing.
    /// - [`TaskError::TaskFailed`] for a task that ended in failure.
    pub fn result(&self, task_id: &str) -> Result<Arc<ResearchReport>, TaskError> {
        let entry = self.entry_for(task_id)?;
        entry.touch();
        let state = entry.state_tx.borrow().clone();
        match state {
            TaskState::Completed(report) => Ok(report),
            TaskState::Failed(failure) => Err(TaskError::TaskFailed {
                task_id: task_id.to_string(),
                kind: failure.kind,
                message: failure.message,
            }),
            TaskState::Queued | TaskState::Processing => Err(TaskError::NotReady {
                task_id: task_id.to_string(),
                current_status: state.status(),
            }),
        }
    }

    /// Subscribes to a task's state changes.
    ///
    /// The waiter counts toward the task's waiter total until dropped;
    /// tasks with waiters are never swept.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown task id.
    pub fn subscribe(&self, task_id: &str) -> Result<TaskWaiter, TaskError> {
        let entry = self.entry_for(task_id)?;
        entry.waiters.fetch_add(1, Ordering::SeqCst);
        Ok(TaskWaiter {
            rx: entry.state_tx.subscribe(),
            entry,
        })
    }

    /// Lists stored reports, newest first. Delegates to the result
    /// store; see [`ResultStore::list`].
    pub async fn list_reports(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ReportSummary>, TaskError> {
        self.store
            .list(limit, offset)
            .await
            .map_err(|e| TaskError::StoreError(e.to_string()))
    }

    /// Deletes a task and everything derived from it: a live run is
    /// aborted (its waiters resolve with an aborted failure), every
    /// alias and the fingerprint entry are removed, the cache key is
    /// dropped, and a persisted report is deleted from the store.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown task id, and
    /// [`TaskError::StoreError`] if the stored report could not be
    /// removed.
    pub async fn delete(&self, task_id: &str) -> Result<(), TaskError> {
        let entry = self.entry_for(task_id)?;

        entry.abort("task deleted");
        // The pending id covers the window where the store write has
        // committed but the completion was not published before the
        // abort landed; the file still has to go.
        let report_id = match &*entry.state_tx.borrow() {
            TaskState::Completed(report) => Some(report.report_id.clone()),
            _ => entry.pending_report_id.lock().clone(),
        };
        self.remove_entry(&entry);

        if self.config.cache.enabled {
            if let Err(e) = self.cache.delete(&entry.fingerprint).await {
                tracing::warn!(
                    fingerprint = %entry.fingerprint,
                    error = %e,
                    "cache delete failed during task deletion"
                );
            }
        }
        if let Some(report_id) = report_id {
            self.store
                .delete(&report_id)
                .await
                .map_err(|e| TaskError::StoreError(e.to_string()))?;
        }
        tracing::debug!(task_id = %task_id, fingerprint = %entry.fingerprint, "deleted task");
        Ok(())
    }

    /// Stops accepting submissions and aborts every live run.
    ///
    /// Waiters on aborted tasks resolve with an aborted failure;
    /// terminal tasks keep their state.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for item in self.tasks.iter() {
            item.value().abort("registry shutting down");
        }
        tracing::debug!("registry shut down");
    }

    /// Starts the background sweeper. Runs until [`shutdown`](Self::shutdown)
    /// or until the returned handle is aborted.
    pub fn run_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if registry.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let removed = registry.sweep_once();
                if removed > 0 {
                    tracing::debug!(removed, "swept task entries");
                }
            }
        })
    }

    /// One sweep pass; returns how many entries were reclaimed.
    ///
    /// Reclaims terminal entries past the TTL, and aborts non-terminal
    /// entries with no sign of life (state change or caller poll) for
    /// `idle_timeout` -- both only when no waiters are attached.
    pub fn sweep_once(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.cache.ttl;

        let mut victims: Vec<Arc<TaskEntry>> = Vec::new();
        for item in self.tasks.iter() {
            let entry = item.value();
            if entry.waiters.load(Ordering::SeqCst) > 0 {
                continue;
            }
            if entry.state_tx.borrow().is_terminal() {
                let expired = entry
                    .terminal_at
                    .read()
                    .is_some_and(|at| now.duration_since(at) >= ttl);
                if expired {
                    victims.push(Arc::clone(entry));
                }
            } else if entry.idle_for() >= self.config.idle_timeout {
                victims.push(Arc::clone(entry));
            }
        }

        let removed = victims.len();
        for entry in victims {
            if !entry.state_tx.borrow().is_terminal() {
                tracing::warn!(
                    fingerprint = %entry.fingerprint,
                    "aborting idle task with no waiters"
                );
                entry.abort("idle timeout");
            }
            self.remove_entry(&entry);
        }
        removed
    }

    fn entry_for(&self, task_id: &str) -> Result<Arc<TaskEntry>, TaskError> {
        self.ids
            .get(task_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Drops every alias that still points at `entry`.
    fn release_aliases(&self, entry: &Arc<TaskEntry>) {
        for task_id in entry.task_ids.lock().drain(..) {
            self.ids
                .remove_if(&task_id, |_, v| Arc::ptr_eq(v, entry));
        }
    }

    /// Removes `entry` and its aliases from the maps. A newer entry
    /// under the same fingerprint is left untouched.
    fn remove_entry(&self, entry: &Arc<TaskEntry>) {
        self.release_aliases(entry);
        self.tasks
            .remove_if(&entry.fingerprint, |_, v| Arc::ptr_eq(v, entry));
    }

    /// The executor: exactly one runs per task entry.
    async fn execute(self: Arc<Self>, entry: Arc<TaskEntry>, request: ReportRequest) {
        entry.publish(TaskState::Processing);
        let fp = entry.fingerprint.clone();

        if self.config.cache.enabled {
            match self.cache.get(&fp).await {
                Ok(Some(report)) => {
                    tracing::debug!(fingerprint = %fp, "cache hit, skipping engine");
                    entry.publish(TaskState::Completed(Arc::new(report)));
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        fingerprint = %fp,
                        error = %e,
                        "cache read failed, treating as miss"
                    );
                }
            }
        }

        match self.run_engine(&request).await {
            Ok(mut report) => {
                // Recorded before the write so a delete racing the
                // completion publish can still remove the stored file.
                *entry.pending_report_id.lock() = Some(report.report_id.clone());
                match self.store.put(&report).await {
                    Ok(location) => {
                        report.storage_location = Some(location);
                        if self.config.cache.enabled {
                            if let Err(e) = self
                                .cache
                                .set(&fp, &report, self.config.cache.ttl)
                                .await
                            {
                                tracing::warn!(
                                    fingerprint = %fp,
                                    error = %e,
                                    "cache write failed, result served from store only"
                                );
                            }
                        }
                        entry.publish(TaskState::Completed(Arc::new(report)));
                    }
                    Err(e) => {
                        // Research succeeded but persistence did not. Attached
                        // waiters still get the in-memory report, exactly once;
                        // the task itself is failed and nothing is cached.
                        tracing::error!(
                            fingerprint = %fp,
                            error = %e,
                            "report persistence failed"
                        );
                        entry.publish(TaskState::Failed(TaskFailure {
                            kind: FailureKind::Storage,
                            message: e.to_string(),
                            report: Some(Arc::new(report)),
                        }));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fp, error = %e, "research failed");
                entry.publish(TaskState::Failed(TaskFailure {
                    kind: FailureKind::Engine,
                    message: e.to_string(),
                    report: None,
                }));
            }
        }
    }

    /// Runs the engine, retrying transient failures with bounded
    /// exponential backoff.
    async fn run_engine(&self, request: &ReportRequest) -> Result<ResearchReport, EngineError> {
        let retry = self.config.retry;
        let mut retries = 0u32;
        loop {
            match self.engine.research(request).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_transient() && retries < retry.max_retries => {
                    retries += 1;
                    let delay = retry.delay_for(retries);
                    tracing::warn!(
                        retry = retries,
                        max_retries = retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient engine error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
