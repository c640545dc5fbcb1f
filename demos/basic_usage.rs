// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic analysis-cache usage example.
//!
//! Demonstrates:
//! 1. Building the cache (Redis if `REDIS_URL` is set, memory otherwise)
//! 2. Coalesced misses for a slow analysis
//! 3. Fresh hits
//! 4. View tracking and promotion
//! 5. Eviction of the promoted tier
//! 6. Displaying stats and metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! REDIS_URL=redis://localhost:6379 cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use analysis_cache::{AnalysisCache, AnalysisCacheConfig, AnalysisSource, ComputeError};
use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};

/// Stands in for the code-host API + LLM round trip.
struct SlowSummarizer;

#[async_trait]
impl AnalysisSource for SlowSummarizer {
    async fn compute_analysis(&self, key: &str) -> Result<Value, ComputeError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!({
            "repo": key,
            "summary": format!("{} is a repository", key),
            "languages": ["rust"],
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure
    // ─────────────────────────────────────────────────────────────────────────
    let config = AnalysisCacheConfig {
        redis_url: std::env::var("REDIS_URL").ok(),
        key_prefix: "demo:".into(),
        retained_promoted: 2,
        ..Default::default()
    };
    let cache = Arc::new(AnalysisCache::from_config(config, Arc::new(SlowSummarizer)).await?);
    let options = cache.config().read_options();

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Ten concurrent readers, one computation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 10 concurrent reads of an uncached repo...");
    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let start = std::time::Instant::now();
            let result = cache.read("tokio-rs/tokio", options).await;
            (result, start.elapsed())
        }));
    }
    for handle in handles {
        let (result, elapsed) = handle.await?;
        println!("   └─ {} ({:?})", result?.served_as, elapsed);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Cached read
    // ─────────────────────────────────────────────────────────────────────────
    let start = std::time::Instant::now();
    let hit = cache.read("tokio-rs/tokio", options).await?;
    println!("\n📖 Second read: {} ({:?})", hit.served_as, start.elapsed());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Views and promotion
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n👀 Tracking views...");
    let repos = [("tokio-rs/tokio", 4), ("serde-rs/serde", 3), ("rust-lang/rust", 2)];
    for (repo, viewers) in repos {
        cache.read(repo, options).await?;
        for v in 0..viewers {
            if let Some(outcome) = cache.record_view(repo, &format!("user-{}", v), json!({"tab": "summary"})).await {
                if let Some(stats) = outcome.stats() {
                    println!(
                        "   └─ {} views={} unique={} promoted={} priority={}",
                        repo, stats.view_count, stats.unique_viewer_count, stats.is_promoted, stats.priority
                    );
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Evict down to the retention budget
    // ─────────────────────────────────────────────────────────────────────────
    let evicted = cache.evict_to_budget().await?;
    println!("\n🧹 Evicted {} low-priority record(s)", evicted);
    for record in cache.store().promoted().await? {
        println!("   └─ kept {} (priority {})", record.key, record.priority);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Stats and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let stats = cache.stats();
    println!("\n📊 Cache stats:");
    println!("   └─ fresh={} stale={} misses={}", stats.fresh, stats.stale, stats.misses);
    println!("   └─ computations={} coalesced={}", stats.computations, stats.coalesced);
    println!("   └─ hit rate: {:.1}%", stats.hit_rate() * 100.0);

    println!("\n📈 Raw metrics:");
    dump_metrics(&snapshotter);

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{}", v),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
