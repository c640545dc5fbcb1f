// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the analysis cache.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `analysis_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `served_as`: fresh, stale, miss
//! - `status`: success, error
//! - `mode`: sync, background

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record how a read was answered
pub fn record_read(served_as: &str) {
    counter!(
        "analysis_cache_reads_total",
        "served_as" => served_as.to_string()
    )
    .increment(1);
}

/// Record read latency
pub fn record_read_latency(served_as: &str, duration: Duration) {
    histogram!(
        "analysis_cache_read_seconds",
        "served_as" => served_as.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a finished computation
pub fn record_computation(mode: &str, status: &str, duration: Duration) {
    counter!(
        "analysis_cache_computations_total",
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "analysis_cache_computation_seconds",
        "mode" => mode.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a caller that attached to an in-flight computation
pub fn record_coalesced() {
    counter!("analysis_cache_coalesced_total").increment(1);
}

/// Set number of computations in flight
pub fn set_pending_computations(count: usize) {
    gauge!("analysis_cache_pending_computations").set(count as f64);
}

/// Record a tracked view
pub fn record_view(status: &str) {
    counter!(
        "analysis_cache_views_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a promotion into the protected tier
pub fn record_promotion() {
    counter!("analysis_cache_promotions_total").increment(1);
}

/// Record demotions by the eviction manager
pub fn record_demotions(count: usize) {
    counter!("analysis_cache_demotions_total").increment(count as u64);
}

/// Record a store error
pub fn record_store_error(operation: &str) {
    counter!(
        "analysis_cache_store_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Timer helper for measuring elapsed time
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
