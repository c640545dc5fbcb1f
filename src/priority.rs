// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Priority scoring for promoted records.
//!
//! ```text
//! score = views·1.0 + unique_viewers·2.0 + recency·0.5
//! recency = max(0, 1 − days_since_last_view / 30)
//! ```
//!
//! Higher is more valuable. Scores are rounded to two decimals so that the
//! same record state always produces the same stored priority.

use crate::clock::MILLIS_PER_DAY;
use crate::record::AnalysisRecord;

/// Counter snapshot used for scoring.
///
/// Missing values are zero; ranking is advisory so scoring never fails.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageCounters {
    pub view_count: u64,
    pub unique_viewer_count: u64,
    pub last_viewed_at: Option<i64>,
}

impl From<&AnalysisRecord> for UsageCounters {
    fn from(record: &AnalysisRecord) -> Self {
        Self {
            view_count: record.view_count,
            unique_viewer_count: record.unique_viewer_count,
            last_viewed_at: record.last_viewed_at,
        }
    }
}

/// Weighted usage score.
#[derive(Debug, Clone, Copy)]
pub struct PriorityScorer {
    /// Weights for (views, unique viewers, recency)
    pub weights: (f64, f64, f64),
    /// Days for the recency bonus to decay to zero
    pub recency_window_days: f64,
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self {
            weights: (1.0, 2.0, 0.5),
            recency_window_days: 30.0,
        }
    }
}

impl PriorityScorer {
    #[must_use]
    pub fn with_recency_window(recency_window_days: f64) -> Self {
        Self {
            recency_window_days,
            ..Self::default()
        }
    }

    /// Linear recency bonus in `[0, 1]`; zero for never-viewed records.
    #[must_use]
    pub fn recency(&self, last_viewed_at: Option<i64>, now: i64) -> f64 {
        let Some(last) = last_viewed_at else {
            return 0.0;
        };
        if !(self.recency_window_days > 0.0) {
            return 0.0;
        }
        let days = now.saturating_sub(last).max(0) as f64 / MILLIS_PER_DAY as f64;
        (1.0 - days / self.recency_window_days).clamp(0.0, 1.0)
    }

    /// Score a counter snapshot at `now`.
    #[must_use]
    pub fn score_counters(&self, counters: &UsageCounters, now: i64) -> f64 {
        let raw = counters.view_count as f64 * self.weights.0
            + counters.unique_viewer_count as f64 * self.weights.1
            + self.recency(counters.last_viewed_at, now) * self.weights.2;
        round2(raw)
    }

    /// Score a record at `now`.
    #[must_use]
    pub fn score(&self, record: &AnalysisRecord, now: i64) -> f64 {
        self.score_counters(&UsageCounters::from(record), now)
    }
}

fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}
