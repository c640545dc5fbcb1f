// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request coalescing for expensive analysis computations.
//!
//! At most one computation runs per key. The first caller inserts a pending
//! entry and spawns the work; everyone else arriving while it runs attaches
//! to the same [`Shared`] future and receives a clone of the same result.
//!
//! ```text
//! caller A ──┐                      ┌──────────────────────────────┐
//! caller B ──┼─→ pending[key]? ─no─→│ spawn: compute → write → remove│
//! caller C ──┘        │ yes         └──────────────────────────────┘
//!                     └─→ attach to Shared future ───────────┘
//! ```
//!
//! The computation runs on its own task, so it finishes even if every
//! caller stops waiting. Panics inside the computation are caught and
//! surfaced as [`ComputeError::Panicked`]; the pending entry is always
//! removed before the shared result resolves.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::metrics::LatencyTimer;
use crate::storage::traits::RecordStore;

/// Failure of the external analysis computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("analysis failed for '{key}': {reason}")]
    Failed { key: String, reason: String },
    #[error("analysis task for '{0}' panicked")]
    Panicked(String),
    #[error("analysis task for '{0}' was cancelled")]
    Cancelled(String),
}

impl ComputeError {
    pub fn failed(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Failed {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// The expensive, externally sourced analysis (code-host API + LLM summary).
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    async fn compute_analysis(&self, key: &str) -> Result<Value, ComputeError>;
}

/// Result fanned out to every attached caller.
pub type ComputeResult = Result<Value, Arc<ComputeError>>;

/// Handle to an in-flight computation.
pub type SharedComputation = Shared<BoxFuture<'static, ComputeResult>>;

/// Who is waiting on the computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMode {
    /// A caller blocks on the result (miss path)
    Sync,
    /// Nobody waits (stale-while-revalidate)
    Background,
}

impl ComputeMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Background => "background",
        }
    }
}

/// Result of [`RequestCoalescer::submit`].
pub struct Submission {
    pub computation: SharedComputation,
    /// This call started the computation rather than attaching
    pub started: bool,
}

/// Counters for the coalescer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Computations actually started
    pub started: u64,
    /// Callers that attached to an in-flight computation
    pub coalesced: u64,
    /// Computations that ended in an error, any mode
    pub failed: u64,
    /// Background computations that ended in an error
    pub background_failed: u64,
    /// Computations currently in flight
    pub in_flight: usize,
}

struct PendingComputation {
    id: u64,
    computation: SharedComputation,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
    background_failed: AtomicU64,
}

/// Deduplicates concurrent computations per key and persists their results.
pub struct RequestCoalescer {
    pending: Arc<Mutex<HashMap<String, PendingComputation>>>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
}

impl RequestCoalescer {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            store,
            clock,
            next_id: AtomicU64::new(1),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `compute` for `key`, or attach to the computation already running.
    ///
    /// `compute` is only called when this call starts the computation.
    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> ComputeResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ComputeError>> + Send + 'static,
    {
        self.submit(key, ComputeMode::Sync, compute).computation.await
    }

    /// Start or attach without waiting.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// handle does not cancel the computation.
    pub fn submit<F, Fut>(&self, key: &str, mode: ComputeMode, compute: F) -> Submission
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ComputeError>> + Send + 'static,
    {
        let mut pending = self.pending.lock();

        if let Some(existing) = pending.get(key) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_coalesced();
            debug!(key = %key, mode = mode.as_str(), "Attached to in-flight computation");
            return Submission {
                computation: existing.computation.clone(),
                started: false,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(execute(
            key.to_string(),
            id,
            mode,
            compute(),
            ExecuteContext {
                store: self.store.clone(),
                clock: self.clock.clone(),
                pending: self.pending.clone(),
                counters: self.counters.clone(),
            },
        ));

        let task_key = key.to_string();
        let computation = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(Arc::new(ComputeError::Panicked(task_key))),
                Err(_) => Err(Arc::new(ComputeError::Cancelled(task_key))),
            }
        }
        .boxed()
        .shared();

        pending.insert(
            key.to_string(),
            PendingComputation {
                id,
                computation: computation.clone(),
            },
        );
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        crate::metrics::set_pending_computations(pending.len());
        debug!(key = %key, mode = mode.as_str(), "Started computation");

        Submission {
            computation,
            started: true,
        }
    }

    /// Handle to the computation running for `key`, if any.
    #[must_use]
    pub fn in_flight(&self, key: &str) -> Option<SharedComputation> {
        self.pending.lock().get(key).map(|p| p.computation.clone())
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            started: self.counters.started.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            background_failed: self.counters.background_failed.load(Ordering::Relaxed),
            in_flight: self.in_flight_count(),
        }
    }
}

struct ExecuteContext {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    pending: Arc<Mutex<HashMap<String, PendingComputation>>>,
    counters: Arc<Counters>,
}

/// Body of the spawned computation task.
async fn execute<Fut>(key: String, id: u64, mode: ComputeMode, work: Fut, ctx: ExecuteContext) -> ComputeResult
where
    Fut: Future<Output = Result<Value, ComputeError>> + Send + 'static,
{
    let timer = LatencyTimer::start();
    let result: ComputeResult = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(Arc::new(e)),
        Err(_) => Err(Arc::new(ComputeError::Panicked(key.clone()))),
    };

    match &result {
        Ok(payload) => {
            crate::metrics::record_computation(mode.as_str(), "success", timer.elapsed());
            // The payload still reaches waiters if persisting it fails.
            if let Err(e) = ctx.store.upsert_payload(&key, payload, ctx.clock.now_millis()).await {
                error!(key = %key, error = %e, "Failed to persist computed analysis");
                crate::metrics::record_store_error("upsert_payload");
            }
        }
        Err(e) => {
            crate::metrics::record_computation(mode.as_str(), "error", timer.elapsed());
            ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
            match mode {
                ComputeMode::Sync => warn!(key = %key, error = %e, "Analysis computation failed"),
                ComputeMode::Background => {
                    ctx.counters.background_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "Background revalidation failed, keeping stale payload");
                }
            }
        }
    }

    {
        let mut pending = ctx.pending.lock();
        if pending.get(&key).is_some_and(|p| p.id == id) {
            pending.remove(&key);
        }
        crate::metrics::set_pending_computations(pending.len());
    }

    result
}
