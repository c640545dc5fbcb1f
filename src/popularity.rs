// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Popularity tracking and promotion into the protected tier.
//!
//! # Flow
//!
//! ```text
//! record_view(key, viewer, context)
//!       │
//!       ▼
//! ┌─────────────────────────────┐
//! │ increment_view (atomic)     │── no record ──→ NotComputed
//! │ add_viewer     (atomic)     │
//! └─────────────────────────────┘
//!       │ post-increment counters
//!       ▼
//! ┌─────────────────────────────┐
//! │ PromotionRule::decide       │
//! │ PriorityScorer::score       │
//! └─────────────────────────────┘
//!       │
//!       ├─→ already promoted → set_priority
//!       └─→ promote          → try_promote (compare-and-set)
//! ```

use std::sync::Arc;
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::priority::{PriorityScorer, UsageCounters};
use crate::record::ViewEvent;
use crate::storage::traits::{RecordStore, StorageError};

/// Why a record earned the protected tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionReason {
    RepeatViews { view_count: u64 },
    DistinctViewers { unique_viewer_count: u64 },
}

impl std::fmt::Display for PromotionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepeatViews { view_count } => write!(f, "popular: {} views", view_count),
            Self::DistinctViewers { unique_viewer_count } => {
                write!(f, "popular: {} distinct viewers", unique_viewer_count)
            }
        }
    }
}

/// Outcome of evaluating the promotion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionDecision {
    Promote(PromotionReason),
    Hold,
}

impl PromotionDecision {
    #[must_use]
    pub fn should_promote(&self) -> bool {
        matches!(self, Self::Promote(_))
    }
}

/// Threshold rule: promote on enough views or enough distinct viewers.
///
/// Every tracked view bumps `view_count` and `view_count >= unique_viewer_count`
/// always holds, so with equal thresholds the distinct-viewer clause never
/// decides. It only matters when `unique_viewer_threshold < view_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionRule {
    pub view_threshold: u64,
    pub unique_viewer_threshold: u64,
}

impl Default for PromotionRule {
    fn default() -> Self {
        Self {
            view_threshold: 2,
            unique_viewer_threshold: 2,
        }
    }
}

impl PromotionRule {
    #[must_use]
    pub fn decide(&self, view_count: u64, unique_viewer_count: u64) -> PromotionDecision {
        if view_count >= self.view_threshold {
            PromotionDecision::Promote(PromotionReason::RepeatViews { view_count })
        } else if unique_viewer_count >= self.unique_viewer_threshold {
            PromotionDecision::Promote(PromotionReason::DistinctViewers { unique_viewer_count })
        } else {
            PromotionDecision::Hold
        }
    }
}

/// Counters and promotion state after a tracked view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewStats {
    pub view_count: u64,
    pub unique_viewer_count: u64,
    /// The viewer had not been seen before
    pub new_viewer: bool,
    pub is_promoted: bool,
    /// This view flipped the record into the protected tier
    pub newly_promoted: bool,
    pub decision: PromotionDecision,
    /// Priority computed from the post-increment counters
    pub priority: f64,
}

/// Result of [`PopularityTracker::record_view`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    /// No analysis exists for the key yet; nothing was recorded
    NotComputed,
    Tracked(ViewStats),
}

impl ViewOutcome {
    #[must_use]
    pub fn stats(&self) -> Option<&ViewStats> {
        match self {
            Self::Tracked(stats) => Some(stats),
            Self::NotComputed => None,
        }
    }

    #[must_use]
    pub fn is_promoted(&self) -> bool {
        self.stats().is_some_and(|s| s.is_promoted)
    }
}

/// Records views and promotes popular records.
pub struct PopularityTracker {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    rule: PromotionRule,
    scorer: PriorityScorer,
    history_capacity: usize,
}

impl PopularityTracker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        rule: PromotionRule,
        scorer: PriorityScorer,
        history_capacity: usize,
    ) -> Self {
        Self {
            store,
            clock,
            rule,
            scorer,
            history_capacity,
        }
    }

    #[must_use]
    pub fn rule(&self) -> PromotionRule {
        self.rule
    }

    /// Track one view of `key` by `viewer_id`.
    ///
    /// Store errors are returned; the orchestrator decides whether to swallow them.
    pub async fn record_view(
        &self,
        key: &str,
        viewer_id: &str,
        context: Value,
    ) -> Result<ViewOutcome, StorageError> {
        let now = self.clock.now_millis();
        let event = ViewEvent::new(viewer_id, now, context);

        let Some(counters) = self.store.increment_view(key, &event, self.history_capacity).await? else {
            debug!(key = %key, "View on uncomputed key ignored");
            return Ok(ViewOutcome::NotComputed);
        };

        let insert = self.store.add_viewer(key, viewer_id).await?;
        // Both counters come from the later snapshot so they respect views >= viewers.
        let view_count = insert.view_count.max(counters.view_count);
        let unique_viewer_count = insert.unique_viewer_count.max(counters.unique_viewer_count);

        let decision = self.rule.decide(view_count, unique_viewer_count);
        let priority = self.scorer.score_counters(
            &UsageCounters {
                view_count,
                unique_viewer_count,
                last_viewed_at: Some(counters.last_viewed_at),
            },
            now,
        );

        let mut is_promoted = false;
        let mut newly_promoted = false;
        if counters.is_promoted {
            // false here means an eviction demoted it since the increment
            is_promoted = self.store.set_priority(key, priority).await?;
        }
        if !is_promoted {
            if let PromotionDecision::Promote(reason) = decision {
                newly_promoted = self.store.try_promote(key, &reason.to_string(), priority).await?;
                // Lost the compare-and-set to a concurrent view: keep its flag, refresh priority.
                is_promoted = newly_promoted || self.store.set_priority(key, priority).await?;
            }
        }

        if newly_promoted {
            info!(key = %key, reason = %reason_text(decision), priority, "Record promoted");
            crate::metrics::record_promotion();
        }

        Ok(ViewOutcome::Tracked(ViewStats {
            view_count,
            unique_viewer_count,
            new_viewer: insert.newly_added,
            is_promoted,
            newly_promoted,
            decision,
            priority,
        }))
    }
}

fn reason_text(decision: PromotionDecision) -> String {
    match decision {
        PromotionDecision::Promote(reason) => reason.to_string(),
        PromotionDecision::Hold => String::new(),
    }
}
