//! Redis cache integration tests.
//!
//! Require a running Redis at `redis://127.0.0.1:6379` (override with
//! `REDIS_URL`). Run with `--features redis-tests`. Each test uses a
//! unique key prefix for isolation.

#![cfg(feature = "redis-tests")]

use std::time::Duration;

use research_tasks::cache::{CacheBackend, RedisCache};
use research_tasks::{CostBreakdown, ReportRequest, ReportType, ResearchReport, Tone};
use uuid::Uuid;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn cache() -> RedisCache {
    RedisCache::new(&redis_url())
        .await
        .expect("Redis must be running for redis-tests")
        .with_prefix(format!("research-test-{}", Uuid::new_v4()))
}

fn report(query: &str) -> ResearchReport {
    let request = ReportRequest::new(query, ReportType::ResearchReport, Tone::Objective);
    ResearchReport::new(&request, "# Findings", vec![], CostBreakdown::default())
}

#[tokio::test]
async fn set_then_get_round_trips() {
    let cache = cache().await;
    let stored = report("redis round trip");
    cache
        .set("fp-1", &stored, Duration::from_secs(60))
        .await
        .unwrap();

    let fetched = cache.get("fp-1").await.unwrap().unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
async fn get_missing_key_is_miss() {
    let cache = cache().await;
    assert!(cache.get("never-set").await.unwrap().is_none());
}

#[tokio::test]
async fn entry_expires_server_side() {
    let cache = cache().await;
    cache
        .set("fp-ttl", &report("short lived"), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(cache.get("fp-ttl").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(cache.get("fp-ttl").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_removes_entry() {
    let cache = cache().await;
    cache
        .set("fp-del", &report("to delete"), Duration::from_secs(60))
        .await
        .unwrap();

    assert!(cache.delete("fp-del").await.unwrap());
    assert!(!cache.delete("fp-del").await.unwrap());
    assert!(cache.get("fp-del").await.unwrap().is_none());
}

#[tokio::test]
async fn prefixes_isolate_caches() {
    let a = cache().await;
    let b = cache().await;

    a.set("shared-key", &report("a's report"), Duration::from_secs(60))
        .await
        .unwrap();
    assert!(b.get("shared-key").await.unwrap().is_none());
}
