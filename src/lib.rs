//! # Analysis Cache
//!
//! A cache-first, stale-tolerant access layer for expensive, externally
//! sourced analyses (repository summaries built from code-host APIs and
//! LLM calls).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    AnalysisCache (read)                     │
//! │  • FreshnessPolicy: fresh / stale / expired                │
//! │  • Stale-while-revalidate with bounded background refresh  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (miss or refresh)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RequestCoalescer                        │
//! │  • One computation per key, shared by every waiter         │
//! │  • Persists successful results                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RecordStore (memory / Redis)                │
//! │  • Atomic view counters and viewer sets                    │
//! │  • Compare-and-set promotion, ranked promoted index        │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │        PopularityTracker (record_view) + EvictionManager    │
//! │  • Promotion after repeat views                            │
//! │  • PriorityScorer ranks the promoted tier                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use analysis_cache::{AnalysisCache, AnalysisCacheConfig, AnalysisSource, ComputeError};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct RepoSummarizer;
//!
//! #[async_trait]
//! impl AnalysisSource for RepoSummarizer {
//!     async fn compute_analysis(&self, key: &str) -> Result<Value, ComputeError> {
//!         Ok(json!({"repo": key, "languages": ["rust"]}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AnalysisCacheConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!     let cache = AnalysisCache::from_config(config, Arc::new(RepoSummarizer))
//!         .await
//!         .expect("Failed to connect");
//!
//!     let result = cache.read("tokio-rs/tokio", cache.config().read_options()).await.unwrap();
//!     println!("{} ({})", result.payload, result.served_as);
//!
//!     cache.record_view("tokio-rs/tokio", "user-42", json!({"page": "summary"})).await;
//!     cache.evict_to_budget().await.unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`AnalysisCache`] orchestrator
//! - [`freshness`]: Age classification
//! - [`popularity`]: View tracking and promotion
//! - [`priority`]: Usage score for ranking promoted records
//! - [`eviction`]: Retention budget for the promoted tier
//! - [`coalescer`]: Per-key request coalescing
//! - [`storage`]: Record stores (memory, Redis)
//! - [`resilience`]: Retry logic

pub mod config;
pub mod clock;
pub mod record;
pub mod freshness;
pub mod popularity;
pub mod priority;
pub mod eviction;
pub mod coalescer;
pub mod storage;
pub mod resilience;
pub mod coordinator;
pub mod metrics;

pub use config::{AnalysisCacheConfig, ReadOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use record::{AnalysisRecord, ViewEvent, EVICTED_REASON};
pub use freshness::{Freshness, FreshnessPolicy};
pub use popularity::{PopularityTracker, PromotionDecision, PromotionReason, PromotionRule, ViewOutcome, ViewStats};
pub use priority::{PriorityScorer, UsageCounters};
pub use eviction::EvictionManager;
pub use coalescer::{AnalysisSource, CoalescerStats, ComputeError, ComputeMode, RequestCoalescer};
pub use coordinator::{AnalysisCache, CacheError, CacheStats, ReadResult, ServedAs};
pub use storage::traits::{RecordStore, StorageError, ViewCounters, ViewerInsert};
pub use storage::memory::InMemoryRecordStore;
pub use storage::redis::RedisRecordStore;
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
