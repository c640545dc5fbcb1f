// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retention budget for the protected tier.
//!
//! Eviction here means demotion: the record and its payload stay in the
//! store and keep following the normal freshness rules, they just lose
//! priority protection.
//!
//! ```text
//! promoted, priority desc (ties: last_viewed_at desc)
//! ┌───┬───┬───┬─────┬───────────┬─────┬─────┐
//! │ 1 │ 2 │ 3 │ ... │ keep_count│ ... │  N  │
//! └───┴───┴───┴─────┴───────────┴─────┴─────┘
//!   ◀──────── retained ────────▶ ◀─ demoted ─▶
//! ```

use std::sync::Arc;
use tracing::{debug, info};

use crate::record::EVICTED_REASON;
use crate::storage::traits::{RecordStore, StorageError};

/// Demotes promoted records beyond a retention budget.
pub struct EvictionManager {
    store: Arc<dyn RecordStore>,
}

impl EvictionManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Keep the `keep_count` highest-priority promoted records and demote the rest.
    ///
    /// Returns how many records this call demoted. Records demoted
    /// concurrently by someone else are not counted.
    pub async fn evict_low_priority(&self, keep_count: usize) -> Result<usize, StorageError> {
        let promoted = self.store.promoted().await?;
        if promoted.len() <= keep_count {
            debug!(promoted = promoted.len(), keep_count, "Promoted tier within budget");
            return Ok(0);
        }

        let mut evicted = 0usize;
        for record in &promoted[keep_count..] {
            if self.store.demote(&record.key, EVICTED_REASON).await? {
                evicted += 1;
            }
        }

        info!(
            promoted = promoted.len(),
            keep_count,
            evicted,
            "Demoted low-priority records"
        );
        crate::metrics::record_demotions(evicted);
        Ok(evicted)
    }
}
