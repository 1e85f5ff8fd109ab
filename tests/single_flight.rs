//! Single-flight and retry behavior under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use research_tasks::cache::{CacheBackend, CacheConfig, CacheError, MemoryCache};
use research_tasks::store::FileResultStore;
use research_tasks::{
    CostBreakdown, EngineError, FailureKind, RegistryConfig, ReportRequest, ReportType,
    ResearchEngine, ResearchReport, RetryPolicy, TaskRegistry, TaskState, TaskStatus, Tone,
};

/// Engine that counts invocations and holds each call open briefly so
/// concurrent submissions genuinely overlap.
struct SlowEngine {
    calls: AtomicUsize,
    hold: Duration,
}

impl SlowEngine {
    fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            hold,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchEngine for SlowEngine {
    async fn research(&self, request: &ReportRequest) -> Result<ResearchReport, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        Ok(ResearchReport::new(
            request,
            "# Findings",
            vec![],
            CostBreakdown::default(),
        ))
    }
}

/// Engine that fails transiently a fixed number of times, then succeeds.
struct FlakyEngine {
    calls: AtomicUsize,
    failures: usize,
}

impl FlakyEngine {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchEngine for FlakyEngine {
    async fn research(&self, request: &ReportRequest) -> Result<ResearchReport, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(EngineError::Transient("engine timed out".to_string()));
        }
        Ok(ResearchReport::new(
            request,
            "# Findings",
            vec![],
            CostBreakdown::default(),
        ))
    }
}

/// Cache backend that is permanently down.
struct DownCache;

#[async_trait]
impl CacheBackend for DownCache {
    async fn get(&self, _: &str) -> Result<Option<ResearchReport>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _: &str, _: &ResearchReport, _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

fn request(query: &str) -> ReportRequest {
    ReportRequest::new(query, ReportType::ResearchReport, Tone::Objective)
}

/// Fast retry policy so backoff tests finish quickly.
fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        multiplier: 2.0,
    }
}

async fn registry_with(
    engine: Arc<dyn ResearchEngine>,
    cache: Arc<dyn CacheBackend>,
    config: RegistryConfig,
) -> (TempDir, Arc<TaskRegistry>) {
    let dir = TempDir::new().unwrap();
    let store = FileResultStore::new(dir.path()).await.unwrap();
    let registry =
        Arc::new(TaskRegistry::new(engine, cache, Arc::new(store)).with_config(config));
    (dir, registry)
}

// ---- single-flight tests ----

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_invoke_engine_once() {
    let engine = SlowEngine::new(Duration::from_millis(100));
    let (_dir, registry) = registry_with(
        engine.clone(),
        Arc::new(MemoryCache::new()),
        RegistryConfig::default(),
    )
    .await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let receipt = registry.submit(request("  Quantum  Computing ")).unwrap();
            let mut waiter = registry.subscribe(&receipt.task_id).unwrap();
            waiter.wait().await
        }));
    }

    let states = futures::future::join_all(handles).await;
    let mut report_ids = Vec::new();
    for state in states {
        match state.unwrap() {
            TaskState::Completed(report) => report_ids.push(report.report_id.clone()),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    assert_eq!(engine.calls(), 1);
    report_ids.dedup();
    assert_eq!(report_ids.len(), 1, "every waiter must see the same report");
    assert_eq!(registry.task_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_holds_with_cache_down() {
    let engine = SlowEngine::new(Duration::from_millis(100));
    let (_dir, registry) = registry_with(
        engine.clone(),
        Arc::new(DownCache),
        RegistryConfig::default(),
    )
    .await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let receipt = registry.submit(request("cache outage")).unwrap();
            let mut waiter = registry.subscribe(&receipt.task_id).unwrap();
            waiter.wait().await
        }));
    }

    for state in futures::future::join_all(handles).await {
        assert!(matches!(state.unwrap(), TaskState::Completed(_)));
    }
    assert_eq!(engine.calls(), 1, "cache outage must not weaken single-flight");
}

#[tokio::test]
async fn distinct_requests_run_separately() {
    let engine = SlowEngine::new(Duration::from_millis(20));
    let (_dir, registry) = registry_with(
        engine.clone(),
        Arc::new(MemoryCache::new()),
        RegistryConfig::default(),
    )
    .await;

    let a = registry.submit(request("topic a")).unwrap();
    let b = registry.submit(request("topic b")).unwrap();
    let mut tone = request("topic a");
    tone.tone = Tone::Persuasive;
    let c = registry.submit(tone).unwrap();

    for id in [&a.task_id, &b.task_id, &c.task_id] {
        let state = registry.subscribe(id).unwrap().wait().await;
        assert!(matches!(state, TaskState::Completed(_)));
    }
    assert_eq!(engine.calls(), 3);
    assert_eq!(registry.task_count(), 3);
}

// ---- status monotonicity ----

fn status_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Queued => 0,
        TaskStatus::Processing => 1,
        TaskStatus::Completed | TaskStatus::Failed => 2,
    }
}

#[tokio::test]
async fn observed_statuses_never_regress() {
    let engine = SlowEngine::new(Duration::from_millis(50));
    let (_dir, registry) = registry_with(
        engine,
        Arc::new(MemoryCache::new()),
        RegistryConfig::default(),
    )
    .await;

    let receipt = registry.submit(request("monotonic")).unwrap();
    let mut observed = vec![receipt.status];
    loop {
        let status = registry.status(&receipt.task_id).unwrap().status;
        observed.push(status);
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for pair in observed.windows(2) {
        assert!(
            status_rank(pair[0]) <= status_rank(pair[1]),
            "status regressed: {observed:?}"
        );
    }
    assert_eq!(*observed.last().unwrap(), TaskStatus::Completed);
}

// ---- retry tests ----

#[tokio::test]
async fn three_transients_then_success_completes_with_three_retries() {
    let engine = FlakyEngine::new(3);
    let config = RegistryConfig {
        retry: fast_retry(3),
        ..RegistryConfig::default()
    };
    let (_dir, registry) =
        registry_with(engine.clone(), Arc::new(MemoryCache::new()), config).await;

    let receipt = registry.submit(request("flaky")).unwrap();
    let state = registry.subscribe(&receipt.task_id).unwrap().wait().await;
    assert!(matches!(state, TaskState::Completed(_)));
    assert_eq!(engine.calls(), 4, "first attempt plus three retries");
}

#[tokio::test]
async fn three_transients_exhaust_two_retries_and_fail() {
    let engine = FlakyEngine::new(3);
    let config = RegistryConfig {
        retry: fast_retry(2),
        ..RegistryConfig::default()
    };
    let (_dir, registry) =
        registry_with(engine.clone(), Arc::new(MemoryCache::new()), config).await;

    let receipt = registry.submit(request("flaky")).unwrap();
    let state = registry.subscribe(&receipt.task_id).unwrap().wait().await;
    let TaskState::Failed(failure) = state else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, FailureKind::Engine);
    assert!(failure.message.contains("timed out"));
    assert_eq!(engine.calls(), 3, "first attempt plus two retries");
}

#[tokio::test]
async fn permanent_error_fails_without_retries() {
    struct PermanentEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResearchEngine for PermanentEngine {
        async fn research(&self, _: &ReportRequest) -> Result<ResearchReport, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Permanent("query rejected".to_string()))
        }
    }

    let engine = Arc::new(PermanentEngine {
        calls: AtomicUsize::new(0),
    });
    let config = RegistryConfig {
        retry: fast_retry(5),
        ..RegistryConfig::default()
    };
    let (_dir, registry) =
        registry_with(engine.clone(), Arc::new(MemoryCache::new()), config).await;

    let receipt = registry.submit(request("rejected")).unwrap();
    let state = registry.subscribe(&receipt.task_id).unwrap().wait().await;
    let TaskState::Failed(failure) = state else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, FailureKind::Engine);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

// ---- TTL expiry ----

#[tokio::test]
async fn post_ttl_resubmission_reinvokes_engine() {
    let engine = SlowEngine::new(Duration::ZERO);
    let config = RegistryConfig {
        cache: CacheConfig {
            enabled: true,
            ttl: Duration::from_millis(30),
        },
        ..RegistryConfig::default()
    };
    let (_dir, registry) =
        registry_with(engine.clone(), Arc::new(MemoryCache::new()), config).await;

    let first = registry.submit(request("expiring")).unwrap();
    registry.subscribe(&first.task_id).unwrap().wait().await;
    assert_eq!(engine.calls(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = registry.submit(request("expiring")).unwrap();
    assert!(!second.joined, "expired result must not be joined");
    let state = registry.subscribe(&second.task_id).unwrap().wait().await;
    assert!(matches!(state, TaskState::Completed(_)));
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn within_ttl_resubmission_skips_engine() {
    let engine = SlowEngine::new(Duration::ZERO);
    let (_dir, registry) = registry_with(
        engine.clone(),
        Arc::new(MemoryCache::new()),
        RegistryConfig::default(),
    )
    .await;

    let first = registry.submit(request("fresh")).unwrap();
    registry.subscribe(&first.task_id).unwrap().wait().await;

    let second = registry.submit(request("fresh")).unwrap();
    assert!(second.joined);
    assert_eq!(engine.calls(), 1);
}

// ---- delete cascade ----

#[tokio::test]
async fn delete_then_resubmit_starts_fresh_work() {
    let engine = SlowEngine::new(Duration::ZERO);
    let (_dir, registry) = registry_with(
        engine.clone(),
        Arc::new(MemoryCache::new()),
        RegistryConfig::default(),
    )
    .await;

    let first = registry.submit(request("deleted")).unwrap();
    registry.subscribe(&first.task_id).unwrap().wait().await;
    registry.delete(&first.task_id).await.unwrap();

    let second = registry.submit(request("deleted")).unwrap();
    assert!(!second.joined);
    let state = registry.subscribe(&second.task_id).unwrap().wait().await;
    assert!(matches!(state, TaskState::Completed(_)));
    assert_eq!(engine.calls(), 2, "deletion must clear the cached result");
}
