//! Public types for the analysis cache orchestrator.

use std::sync::Arc;
use serde_json::Value;
use thiserror::Error;

use crate::coalescer::ComputeError;
use crate::storage::traits::StorageError;

/// How a read was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedAs {
    /// Stored payload younger than the stale threshold
    Fresh,
    /// Stored payload served while a background refresh runs
    Stale,
    /// Payload computed for this read
    Miss,
}

impl ServedAs {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Miss => "miss",
        }
    }
}

impl std::fmt::Display for ServedAs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`super::AnalysisCache::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub payload: Value,
    pub served_as: ServedAs,
}

/// Errors surfaced by the orchestrator.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] Arc<StorageError>),
    #[error(transparent)]
    Compute(#[from] Arc<ComputeError>),
}

impl From<StorageError> for CacheError {
    fn from(e: StorageError) -> Self {
        Self::Store(Arc::new(e))
    }
}

/// Point-in-time counters for the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Reads answered from a fresh record
    pub fresh: u64,
    /// Reads answered from a stale record
    pub stale: u64,
    /// Reads that computed the payload
    pub misses: u64,
    /// Computations started (sync and background)
    pub computations: u64,
    /// Callers that attached to an in-flight computation
    pub coalesced: u64,
    /// Computations that failed, any mode
    pub computation_failures: u64,
    /// Background refreshes that failed
    pub revalidation_failures: u64,
    /// Computations currently running
    pub in_flight: usize,
}

impl CacheStats {
    /// Share of reads answered without waiting for a computation.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.fresh + self.stale + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.fresh + self.stale) as f64 / total as f64
        }
    }
}
