//! Analysis record data structure.
//!
//! The [`AnalysisRecord`] is the persisted unit of the cache: one per
//! analysis key, holding the computed payload plus the popularity counters
//! that drive promotion and eviction.

use std::collections::{HashSet, VecDeque};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Promotion reason stamped on records demoted by the eviction manager.
pub const EVICTED_REASON: &str = "evicted: low priority";

/// One tracked access of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub viewer_id: String,
    /// Epoch millis
    pub timestamp: i64,
    /// Free-form context supplied by the caller (page, referrer, ...)
    #[serde(default)]
    pub context: Value,
}

impl ViewEvent {
    pub fn new(viewer_id: impl Into<String>, timestamp: i64, context: Value) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            timestamp,
            context,
        }
    }
}

/// Persisted analysis result and its usage counters.
///
/// # Example
///
/// ```
/// use analysis_cache::AnalysisRecord;
/// use serde_json::json;
///
/// let record = AnalysisRecord::new("github.com/rust-lang/rust".into(), json!({"stars": 1}), 0);
/// assert_eq!(record.view_count, 0);
/// assert!(!record.is_promoted);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Normalized repository identifier
    pub key: String,
    /// Opaque computed result
    pub payload: Value,
    /// Last successful (re)computation (epoch millis)
    pub computed_at: i64,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub unique_viewer_count: u64,
    /// Most recent views, oldest first
    #[serde(default)]
    pub view_history: VecDeque<ViewEvent>,
    /// Every viewer ever recorded
    #[serde(default)]
    pub viewed_by: HashSet<String>,
    #[serde(default)]
    pub is_promoted: bool,
    #[serde(default)]
    pub promotion_reason: Option<String>,
    /// Eviction priority; zero while demoted
    #[serde(default)]
    pub priority: f64,
    /// Most recent tracked view (epoch millis), if any
    #[serde(default)]
    pub last_viewed_at: Option<i64>,
}

impl AnalysisRecord {
    /// Create a record for a freshly computed payload.
    pub fn new(key: String, payload: Value, computed_at: i64) -> Self {
        Self {
            key,
            payload,
            computed_at,
            view_count: 0,
            unique_viewer_count: 0,
            view_history: VecDeque::new(),
            viewed_by: HashSet::new(),
            is_promoted: false,
            promotion_reason: None,
            priority: 0.0,
            last_viewed_at: None,
        }
    }

    /// Age of the payload at `now` (never negative).
    #[must_use]
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.computed_at).max(0)
    }

    /// Append a view, dropping the oldest entries beyond `capacity`.
    pub fn push_view(&mut self, event: ViewEvent, capacity: usize) {
        self.view_history.push_back(event);
        while self.view_history.len() > capacity {
            self.view_history.pop_front();
        }
    }

    /// Leave the protected tier.
    pub fn demote(&mut self, reason: &str) {
        self.is_promoted = false;
        self.promotion_reason = Some(reason.to_string());
        self.priority = 0.0;
    }
}
