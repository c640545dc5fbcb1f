// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Analysis cache orchestrator.
//!
//! The [`AnalysisCache`] ties the components together:
//! - [`FreshnessPolicy`] decides fresh / stale / expired per read
//! - [`RequestCoalescer`] runs at most one computation per key
//! - [`PopularityTracker`] counts views and promotes popular records
//! - [`EvictionManager`] bounds the promoted tier
//!
//! # Read path
//!
//! ```text
//! read(key)
//!   │
//!   ├─ no record ──────────────────────────────→ compute (coalesced) → Miss
//!   ├─ fresh ──────────────────────────────────→ Fresh
//!   ├─ stale + revalidate ─→ spawn refresh ────→ Stale (old payload)
//!   ├─ stale, strict ──────────────────────────→ compute (coalesced) → Miss
//!   └─ expired ────────────────────────────────→ compute (coalesced) → Miss
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use analysis_cache::{
//!     AnalysisCache, AnalysisCacheConfig, AnalysisSource, ComputeError, ServedAs,
//! };
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct Summarizer;
//!
//! #[async_trait]
//! impl AnalysisSource for Summarizer {
//!     async fn compute_analysis(&self, key: &str) -> Result<Value, ComputeError> {
//!         Ok(json!({"repo": key, "summary": "..."}))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = AnalysisCache::from_config(AnalysisCacheConfig::default(), Arc::new(Summarizer))
//!     .await
//!     .expect("store");
//!
//! let first = cache.read("rust-lang/rust", cache.config().read_options()).await.unwrap();
//! assert_eq!(first.served_as, ServedAs::Miss);
//!
//! cache.record_view("rust-lang/rust", "user-1", json!({"page": "overview"})).await;
//! # }
//! ```

mod api;
mod types;

pub use types::{CacheError, CacheStats, ReadResult, ServedAs};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::coalescer::{AnalysisSource, RequestCoalescer};
use crate::config::AnalysisCacheConfig;
use crate::eviction::EvictionManager;
use crate::freshness::FreshnessPolicy;
use crate::popularity::{PopularityTracker, PromotionRule};
use crate::priority::PriorityScorer;
use crate::storage::memory::InMemoryRecordStore;
use crate::storage::redis::RedisRecordStore;
use crate::storage::traits::{RecordStore, StorageError};

#[derive(Default)]
struct ReadCounters {
    fresh: AtomicU64,
    stale: AtomicU64,
    misses: AtomicU64,
}

/// Cache-first, stale-tolerant access to expensive analyses.
///
/// All components are constructed here and dropped with the cache; nothing
/// is process-global. Share it behind an `Arc`.
pub struct AnalysisCache {
    pub(super) config: AnalysisCacheConfig,
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) source: Arc<dyn AnalysisSource>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) freshness: FreshnessPolicy,
    pub(super) tracker: PopularityTracker,
    pub(super) eviction: EvictionManager,
    pub(super) coalescer: RequestCoalescer,
    /// Bounds concurrently running background refreshes
    pub(super) revalidation_permits: Arc<Semaphore>,
    counters: ReadCounters,
}

impl AnalysisCache {
    /// Build a cache over an explicit store and clock.
    pub fn new(
        config: AnalysisCacheConfig,
        store: Arc<dyn RecordStore>,
        source: Arc<dyn AnalysisSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rule = PromotionRule {
            view_threshold: config.promotion_view_threshold,
            unique_viewer_threshold: config.promotion_unique_viewer_threshold,
        };
        let scorer = PriorityScorer::with_recency_window(config.recency_window_days);

        Self {
            freshness: FreshnessPolicy::new(config.stale_threshold()),
            tracker: PopularityTracker::new(store.clone(), clock.clone(), rule, scorer, config.history_capacity),
            eviction: EvictionManager::new(store.clone()),
            coalescer: RequestCoalescer::new(store.clone(), clock.clone()),
            revalidation_permits: Arc::new(Semaphore::new(config.revalidation_concurrency.max(1))),
            counters: ReadCounters::default(),
            config,
            store,
            source,
            clock,
        }
    }

    /// Build a cache with the store selected by `config`.
    ///
    /// Uses Redis when `redis_url` is set, process memory otherwise.
    pub async fn from_config(
        config: AnalysisCacheConfig,
        source: Arc<dyn AnalysisSource>,
    ) -> Result<Self, StorageError> {
        let store: Arc<dyn RecordStore> = match config.redis_url.as_deref() {
            Some(url) => {
                let store = RedisRecordStore::with_prefix(url, &config.key_prefix).await?;
                info!(prefix = %config.key_prefix, "Using Redis record store");
                Arc::new(store)
            }
            None => {
                info!("Using in-memory record store");
                Arc::new(InMemoryRecordStore::new())
            }
        };
        Ok(Self::new(config, store, source, Arc::new(SystemClock)))
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    #[must_use]
    pub fn coalescer(&self) -> &RequestCoalescer {
        &self.coalescer
    }

    #[must_use]
    pub fn tracker(&self) -> &PopularityTracker {
        &self.tracker
    }

    /// Snapshot of read and computation counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let computations = self.coalescer.stats();
        CacheStats {
            fresh: self.counters.fresh.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: computations.started,
            coalesced: computations.coalesced,
            computation_failures: computations.failed,
            revalidation_failures: computations.background_failed,
            in_flight: computations.in_flight,
        }
    }

    pub(super) fn count_read(&self, served_as: ServedAs) {
        let counter = match served_as {
            ServedAs::Fresh => &self.counters.fresh,
            ServedAs::Stale => &self.counters.stale,
            ServedAs::Miss => &self.counters.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
