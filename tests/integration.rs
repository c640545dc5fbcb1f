//! Integration Tests for the Analysis Cache
//!
//! Exercises the public API end to end. The `happy_*` and `concurrency_*`
//! tests run against the in-memory store with a manual clock. The `redis_*`
//! tests need a real Redis and use testcontainers.
//!
//! # Running Tests
//! ```bash
//! # In-memory tests
//! cargo test --test integration
//!
//! # Redis tests (requires Docker)
//! cargo test --test integration redis -- --ignored
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use analysis_cache::{
    AnalysisCache, AnalysisCacheConfig, AnalysisSource, ComputeError, InMemoryRecordStore,
    ManualClock, PriorityScorer, ReadOptions, RecordStore, RedisRecordStore, ServedAs,
    EVICTED_REASON,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

const NOW: i64 = 1_800_000_000_000;
const HOUR: i64 = 60 * 60 * 1000;
const DAY: i64 = 24 * HOUR;

// =============================================================================
// Helpers
// =============================================================================

/// Slow source that counts invocations and stamps a version into the payload.
struct SlowSource {
    calls: AtomicUsize,
    delay: Duration,
}

impl SlowSource {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisSource for SlowSource {
    async fn compute_analysis(&self, key: &str) -> Result<Value, ComputeError> {
        let version = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(json!({"repo": key, "version": version}))
    }
}

fn memory_cache(source: Arc<SlowSource>) -> (Arc<AnalysisCache>, Arc<InMemoryRecordStore>, Arc<ManualClock>) {
    let store = Arc::new(InMemoryRecordStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let cache = AnalysisCache::new(AnalysisCacheConfig::default(), store.clone(), source, clock.clone());
    (Arc::new(cache), store, clock)
}

async fn settle(cache: &AnalysisCache, key: &str) {
    if let Some(handle) = cache.coalescer().in_flight(key) {
        let _ = handle.await;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Happy Path Tests - In-Memory Store
// =============================================================================

#[tokio::test]
async fn happy_freshness_boundaries() {
    init_tracing();
    let (cache, store, _clock) = memory_cache(SlowSource::new(Duration::ZERO));
    store.upsert_payload("now", &json!("now"), NOW).await.unwrap();
    store.upsert_payload("yesterday", &json!("yesterday"), NOW - 25 * HOUR).await.unwrap();
    store.upsert_payload("last-week", &json!("last-week"), NOW - 8 * DAY).await.unwrap();

    let fresh = cache.read("now", ReadOptions::default()).await.unwrap();
    assert_eq!(fresh.served_as, ServedAs::Fresh);
    assert_eq!(fresh.payload, json!("now"));

    let stale = cache.read("yesterday", ReadOptions::default()).await.unwrap();
    assert_eq!(stale.served_as, ServedAs::Stale);
    assert_eq!(stale.payload, json!("yesterday"));

    let expired = cache.read("last-week", ReadOptions::default()).await.unwrap();
    assert_eq!(expired.served_as, ServedAs::Miss);
    assert_eq!(expired.payload["repo"], json!("last-week"));
}

#[tokio::test]
async fn happy_stale_while_revalidate() {
    let source = SlowSource::new(Duration::from_millis(20));
    let (cache, store, _clock) = memory_cache(source.clone());
    store.upsert_payload("repo", &json!("old"), NOW - 25 * HOUR).await.unwrap();

    let stale = cache.read("repo", ReadOptions::default()).await.unwrap();
    assert_eq!(stale.served_as, ServedAs::Stale);
    assert_eq!(stale.payload, json!("old"));

    settle(&cache, "repo").await;

    let fresh = cache.read("repo", ReadOptions::default()).await.unwrap();
    assert_eq!(fresh.served_as, ServedAs::Fresh);
    assert_eq!(fresh.payload, json!({"repo": "repo", "version": 1}));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn happy_promotion_after_second_view() {
    let (cache, store, _clock) = memory_cache(SlowSource::new(Duration::ZERO));
    cache.read("repo", ReadOptions::default()).await.unwrap();

    let first = cache.record_view("repo", "alice", json!({"page": "summary"})).await.unwrap();
    assert!(!first.is_promoted());
    assert!(!store.get("repo").await.unwrap().unwrap().is_promoted);

    let second = cache.record_view("repo", "alice", json!({"page": "files"})).await.unwrap();
    assert!(second.is_promoted());

    let record = store.get("repo").await.unwrap().unwrap();
    assert!(record.is_promoted);
    assert_eq!(record.view_count, 2);
    assert_eq!(record.unique_viewer_count, 1);
    assert_eq!(record.promotion_reason.as_deref(), Some("popular: 2 views"));
    assert_eq!(record.view_history.len(), 2);
    assert_eq!(record.view_history[1].context, json!({"page": "files"}));
}

#[tokio::test]
async fn happy_view_on_uncomputed_key_is_ignored() {
    let (cache, store, _clock) = memory_cache(SlowSource::new(Duration::ZERO));

    let outcome = cache.record_view("ghost", "alice", json!({})).await.unwrap();

    assert!(outcome.stats().is_none());
    assert!(store.get("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn happy_eviction_keeps_top_scores() {
    let (cache, store, _clock) = memory_cache(SlowSource::new(Duration::ZERO));

    // Record i gets i + 2 views from distinct viewers, so scores are all different
    for i in 0..150usize {
        let key = format!("repo-{:03}", i);
        cache.write(&key, json!({"i": i})).await.unwrap();
        for viewer in 0..(i + 2) {
            cache.record_view(&key, &format!("user-{}", viewer), json!({})).await;
        }
    }
    assert_eq!(store.promoted().await.unwrap().len(), 150);

    let scorer = PriorityScorer::default();
    let mut ranked: Vec<(f64, String)> = Vec::new();
    for i in 0..150usize {
        let key = format!("repo-{:03}", i);
        let record = store.get(&key).await.unwrap().unwrap();
        ranked.push((scorer.score(&record, NOW), key));
    }
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    let expected: HashSet<String> = ranked.iter().take(100).map(|(_, k)| k.clone()).collect();

    let evicted = cache.evict_low_priority(100).await.unwrap();
    assert_eq!(evicted, 50);

    let retained: HashSet<String> = store.promoted().await.unwrap().into_iter().map(|r| r.key).collect();
    assert_eq!(retained, expected);

    // Demoted records keep their payload
    let demoted = store.get("repo-000").await.unwrap().unwrap();
    assert!(!demoted.is_promoted);
    assert_eq!(demoted.priority, 0.0);
    assert_eq!(demoted.promotion_reason.as_deref(), Some(EVICTED_REASON));
    assert_eq!(demoted.payload, json!({"i": 0}));
    assert_eq!(cache.read("repo-000", ReadOptions::default()).await.unwrap().served_as, ServedAs::Fresh);
}

#[tokio::test]
async fn happy_demoted_record_earns_promotion_back() {
    let (cache, store, _clock) = memory_cache(SlowSource::new(Duration::ZERO));
    cache.write("repo", json!("x")).await.unwrap();
    cache.record_view("repo", "alice", json!({})).await;
    cache.record_view("repo", "bob", json!({})).await;

    assert_eq!(cache.evict_low_priority(0).await.unwrap(), 1);
    assert!(!store.get("repo").await.unwrap().unwrap().is_promoted);

    let outcome = cache.record_view("repo", "carol", json!({})).await.unwrap();
    assert!(outcome.is_promoted());
    assert!(store.get("repo").await.unwrap().unwrap().is_promoted);
}

#[tokio::test]
async fn happy_expired_after_clock_advance() {
    let source = SlowSource::new(Duration::ZERO);
    let (cache, _store, clock) = memory_cache(source.clone());

    assert_eq!(cache.read("repo", ReadOptions::default()).await.unwrap().served_as, ServedAs::Miss);
    clock.advance(Duration::from_secs(7 * 24 * 60 * 60));

    let again = cache.read("repo", ReadOptions::default()).await.unwrap();
    assert_eq!(again.served_as, ServedAs::Miss);
    assert_eq!(again.payload["version"], json!(2));
    assert_eq!(source.calls(), 2);
}

// =============================================================================
// Concurrency Tests - In-Memory Store
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_reads_of_missing_key_share_one_computation() {
    let source = SlowSource::new(Duration::from_millis(100));
    let (cache, _store, _clock) = memory_cache(source.clone());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.read("repo", ReadOptions::default()).await
        }));
    }

    let mut payloads = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.served_as, ServedAs::Miss);
        payloads.push(result.payload);
    }

    assert_eq!(source.calls(), 1);
    assert!(payloads.iter().all(|p| *p == json!({"repo": "repo", "version": 1})));
    assert_eq!(cache.stats().computations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_views_keep_counters_consistent() {
    let (cache, store, _clock) = memory_cache(SlowSource::new(Duration::ZERO));
    cache.write("repo", json!("x")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..200 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.record_view("repo", &format!("user-{}", i % 9), json!({})).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        let stats = outcome.stats().unwrap();
        assert!(stats.unique_viewer_count <= stats.view_count);
    }

    let record = store.get("repo").await.unwrap().unwrap();
    assert_eq!(record.view_count, 200);
    assert_eq!(record.unique_viewer_count, 9);
    assert_eq!(record.view_history.len(), 100);
    assert!(record.is_promoted);
}

// =============================================================================
// Redis Tests - Require Docker
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

async fn redis_cache(
    port: u16,
    source: Arc<SlowSource>,
) -> (Arc<AnalysisCache>, Arc<RedisRecordStore>, Arc<ManualClock>) {
    let url = format!("redis://127.0.0.1:{}", port);
    let store = Arc::new(RedisRecordStore::with_prefix(&url, "test:").await.expect("Redis connect"));
    let clock = Arc::new(ManualClock::new(NOW));
    let cache = AnalysisCache::new(AnalysisCacheConfig::default(), store.clone(), source, clock.clone());
    (Arc::new(cache), store, clock)
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_read_write_and_freshness() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let source = SlowSource::new(Duration::ZERO);
    let (cache, store, clock) = redis_cache(redis.get_host_port_ipv4(6379), source.clone()).await;

    let miss = cache.read("repo", ReadOptions::default()).await.unwrap();
    assert_eq!(miss.served_as, ServedAs::Miss);

    let fresh = cache.read("repo", ReadOptions::default()).await.unwrap();
    assert_eq!(fresh.served_as, ServedAs::Fresh);
    assert_eq!(fresh.payload, miss.payload);

    clock.advance(Duration::from_secs(25 * 60 * 60));
    let stale = cache.read("repo", ReadOptions::default()).await.unwrap();
    assert_eq!(stale.served_as, ServedAs::Stale);
    settle(&cache, "repo").await;

    let record = store.get("repo").await.unwrap().unwrap();
    assert_eq!(record.payload["version"], json!(2));
    assert_eq!(record.computed_at, NOW + 25 * HOUR);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_views_promotion_and_eviction() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (cache, store, _clock) = redis_cache(redis.get_host_port_ipv4(6379), SlowSource::new(Duration::ZERO)).await;

    for (key, viewers) in [("low", 2usize), ("mid", 3), ("high", 5)] {
        cache.write(key, json!({"repo": key})).await.unwrap();
        for v in 0..viewers {
            cache.record_view(key, &format!("user-{}", v), json!({"n": v})).await;
        }
    }
    // Repeat viewer does not bump the distinct count
    cache.record_view("high", "user-0", json!({})).await;

    let high = store.get("high").await.unwrap().unwrap();
    assert_eq!(high.view_count, 6);
    assert_eq!(high.unique_viewer_count, 5);
    assert!(high.is_promoted);
    assert_eq!(high.priority, 16.5);

    let ranked: Vec<String> = store.promoted().await.unwrap().into_iter().map(|r| r.key).collect();
    assert_eq!(ranked, vec!["high", "mid", "low"]);

    assert_eq!(cache.evict_low_priority(2).await.unwrap(), 1);
    let low = store.get("low").await.unwrap().unwrap();
    assert!(!low.is_promoted);
    assert_eq!(low.promotion_reason.as_deref(), Some(EVICTED_REASON));
    assert_eq!(low.payload, json!({"repo": "low"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Docker
async fn redis_concurrent_views_are_atomic() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (cache, store, _clock) = redis_cache(redis.get_host_port_ipv4(6379), SlowSource::new(Duration::ZERO)).await;
    cache.write("repo", json!("x")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..100 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.record_view("repo", &format!("user-{}", i % 4), json!({})).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    let record = store.get("repo").await.unwrap().unwrap();
    assert_eq!(record.view_count, 100);
    assert_eq!(record.unique_viewer_count, 4);
    assert_eq!(record.view_history.len(), 100);
    assert_eq!(store.promoted().await.unwrap().len(), 1);
}
