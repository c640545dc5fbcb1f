//! Configuration for the analysis cache.
//!
//! # Example
//!
//! ```
//! use analysis_cache::AnalysisCacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = AnalysisCacheConfig::default();
//! assert_eq!(config.ttl_secs, 7 * 24 * 60 * 60);
//! assert_eq!(config.history_capacity, 100);
//!
//! // Redis-backed deployment with a tighter retention budget
//! let config = AnalysisCacheConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     retained_promoted: 50,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;
use serde::Deserialize;

/// Configuration for the analysis cache.
///
/// All fields have sensible defaults. Set `redis_url` to persist records in
/// Redis instead of process memory.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisCacheConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prepended to every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Age at which a record is treated as absent (default: 7 days)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Age at which a record becomes stale (default: 1 day)
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    /// Most recent view events kept per record
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Promotion thresholds
    #[serde(default = "default_promotion_view_threshold")]
    pub promotion_view_threshold: u64,
    #[serde(default = "default_promotion_unique_viewer_threshold")]
    pub promotion_unique_viewer_threshold: u64,

    /// Days over which the recency bonus decays to zero
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: f64,

    /// Promoted records kept by [`evict_to_budget`](crate::AnalysisCache::evict_to_budget)
    #[serde(default = "default_retained_promoted")]
    pub retained_promoted: usize,

    /// Max background revalidations running at once
    #[serde(default = "default_revalidation_concurrency")]
    pub revalidation_concurrency: usize,
}

fn default_key_prefix() -> String { "analysis:".to_string() }
fn default_ttl_secs() -> u64 { 7 * 24 * 60 * 60 } // 7 days
fn default_stale_threshold_secs() -> u64 { 24 * 60 * 60 } // 1 day
fn default_history_capacity() -> usize { 100 }
fn default_promotion_view_threshold() -> u64 { 2 }
fn default_promotion_unique_viewer_threshold() -> u64 { 2 }
fn default_recency_window_days() -> f64 { 30.0 }
fn default_retained_promoted() -> usize { 100 }
fn default_revalidation_concurrency() -> usize { 8 }

impl Default for AnalysisCacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            history_capacity: default_history_capacity(),
            promotion_view_threshold: default_promotion_view_threshold(),
            promotion_unique_viewer_threshold: default_promotion_unique_viewer_threshold(),
            recency_window_days: default_recency_window_days(),
            retained_promoted: default_retained_promoted(),
            revalidation_concurrency: default_revalidation_concurrency(),
        }
    }
}

impl AnalysisCacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    /// Per-read options using this config's TTL.
    #[must_use]
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            ttl: self.ttl(),
            allow_stale_with_revalidate: true,
        }
    }
}

/// Per-call options for [`AnalysisCache::read`](crate::AnalysisCache::read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Age at which the record counts as expired
    pub ttl: Duration,
    /// Serve stale payloads immediately and refresh in the background
    pub allow_stale_with_revalidate: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(default_ttl_secs()),
            allow_stale_with_revalidate: true,
        }
    }
}

impl ReadOptions {
    /// Stale records are recomputed synchronously instead of served.
    #[must_use]
    pub fn strict(ttl: Duration) -> Self {
        Self {
            ttl,
            allow_stale_with_revalidate: false,
        }
    }
}
