//! Public operations: read, write, view tracking and eviction.

use serde_json::Value;
use tracing::{debug, warn};

use crate::coalescer::{ComputeError, ComputeMode};
use crate::config::ReadOptions;
use crate::freshness::Freshness;
use crate::metrics::LatencyTimer;
use crate::popularity::ViewOutcome;

use super::{AnalysisCache, CacheError, ReadResult, ServedAs};

impl AnalysisCache {
    /// Read the analysis for `key`, computing it when nothing usable is stored.
    ///
    /// Fresh records are returned as is. Stale records are returned
    /// immediately when `allow_stale_with_revalidate` is set, with a refresh
    /// started in the background; otherwise they are recomputed like a miss.
    /// Expired or absent records are computed synchronously through the
    /// coalescer, so concurrent readers share one computation.
    ///
    /// # Errors
    /// - [`CacheError::Store`] if the record cannot be read
    /// - [`CacheError::Compute`] if the synchronous computation fails
    #[tracing::instrument(skip(self, options), fields(served_as))]
    pub async fn read(&self, key: &str, options: ReadOptions) -> Result<ReadResult, CacheError> {
        let timer = LatencyTimer::start();

        let record = self.store.get(key).await.map_err(|e| {
            warn!(error = %e, "Record lookup failed");
            crate::metrics::record_store_error("get");
            e
        })?;

        let now = self.clock.now_millis();
        let served = match record {
            None => None,
            Some(record) => match self.freshness.classify(record.computed_at, now, options.ttl) {
                Freshness::Fresh => Some(ReadResult {
                    payload: record.payload,
                    served_as: ServedAs::Fresh,
                }),
                Freshness::Stale if options.allow_stale_with_revalidate => {
                    self.revalidate(key);
                    Some(ReadResult {
                        payload: record.payload,
                        served_as: ServedAs::Stale,
                    })
                }
                Freshness::Stale => {
                    debug!("Stale record, revalidation not allowed");
                    None
                }
                Freshness::Expired => {
                    debug!(age_ms = record.age_millis(now), "Record expired");
                    None
                }
            },
        };

        let result = match served {
            Some(result) => result,
            None => ReadResult {
                payload: self.compute(key).await?,
                served_as: ServedAs::Miss,
            },
        };

        tracing::Span::current().record("served_as", result.served_as.as_str());
        self.count_read(result.served_as);
        crate::metrics::record_read(result.served_as.as_str());
        crate::metrics::record_read_latency(result.served_as.as_str(), timer.elapsed());
        Ok(result)
    }

    /// Store `payload` as the current analysis, stamped with the current time.
    ///
    /// Counters and promotion state of an existing record are kept.
    #[tracing::instrument(skip(self, payload))]
    pub async fn write(&self, key: &str, payload: Value) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        self.store.upsert_payload(key, &payload, now).await.map_err(|e| {
            warn!(error = %e, "Record write failed");
            crate::metrics::record_store_error("upsert_payload");
            CacheError::from(e)
        })
    }

    /// Track a view of `key`.
    ///
    /// View tracking is best-effort: store failures are logged and `None` is
    /// returned instead of an error.
    #[tracing::instrument(skip(self, context))]
    pub async fn record_view(&self, key: &str, viewer_id: &str, context: Value) -> Option<ViewOutcome> {
        match self.tracker.record_view(key, viewer_id, context).await {
            Ok(outcome) => {
                let status = match &outcome {
                    ViewOutcome::Tracked(_) => "tracked",
                    ViewOutcome::NotComputed => "not_computed",
                };
                crate::metrics::record_view(status);
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "View tracking failed");
                crate::metrics::record_view("error");
                crate::metrics::record_store_error("record_view");
                None
            }
        }
    }

    /// Keep the `keep_count` highest-priority promoted records; demote the rest.
    ///
    /// Returns the number of records demoted.
    #[tracing::instrument(skip(self))]
    pub async fn evict_low_priority(&self, keep_count: usize) -> Result<usize, CacheError> {
        self.eviction.evict_low_priority(keep_count).await.map_err(|e| {
            warn!(error = %e, "Eviction failed");
            crate::metrics::record_store_error("evict");
            CacheError::from(e)
        })
    }

    /// [`evict_low_priority`](Self::evict_low_priority) with the configured
    /// `retained_promoted` budget.
    pub async fn evict_to_budget(&self) -> Result<usize, CacheError> {
        self.evict_low_priority(self.config.retained_promoted).await
    }

    async fn compute(&self, key: &str) -> Result<Value, CacheError> {
        let source = self.source.clone();
        let owned = key.to_string();
        self.coalescer
            .run(key, move || async move { source.compute_analysis(&owned).await })
            .await
            .map_err(CacheError::Compute)
    }

    /// Start a background refresh without waiting for it.
    ///
    /// Returns `false` if a computation for `key` was already running.
    fn revalidate(&self, key: &str) -> bool {
        let source = self.source.clone();
        let permits = self.revalidation_permits.clone();
        let owned = key.to_string();

        let submission = self.coalescer.submit(key, ComputeMode::Background, move || async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ComputeError::Cancelled(owned.clone()))?;
            source.compute_analysis(&owned).await
        });

        if submission.started {
            debug!("Background revalidation started");
        }
        submission.started
    }
}
