use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use crate::record::{AnalysisRecord, ViewEvent};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Malformed record '{key}': {reason}")]
    Malformed {
        key: String,
        reason: String,
    },
}

/// Counters after an atomic view increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewCounters {
    pub view_count: u64,
    pub unique_viewer_count: u64,
    pub is_promoted: bool,
    pub last_viewed_at: i64,
}

/// Result of an atomic "add viewer to set" operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerInsert {
    /// The viewer was not in the set before this call
    pub newly_added: bool,
    /// Unique viewer count after this call
    pub unique_viewer_count: u64,
    /// View count read in the same atomic step
    pub view_count: u64,
}

/// System of record for analysis records.
///
/// Every mutating method is a single atomic operation against the backend.
/// Callers never read a value, change it in memory and write it back.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AnalysisRecord>, StorageError>;

    /// Set `payload` and `computed_at`, creating the record if absent.
    /// Counters and promotion state of an existing record are untouched.
    async fn upsert_payload(&self, key: &str, payload: &Value, computed_at: i64) -> Result<(), StorageError>;

    /// Bump `view_count`, stamp `last_viewed_at` and append to the history
    /// (trimmed to `history_capacity`). Returns `None` when no record exists.
    async fn increment_view(
        &self,
        key: &str,
        event: &ViewEvent,
        history_capacity: usize,
    ) -> Result<Option<ViewCounters>, StorageError>;

    /// Insert `viewer_id` into the viewer set, bumping `unique_viewer_count`
    /// only when it was not already present.
    async fn add_viewer(&self, key: &str, viewer_id: &str) -> Result<ViewerInsert, StorageError>;

    /// Compare-and-set `is_promoted` from false to true, storing reason and
    /// priority. Returns `false` if the record was already promoted or absent.
    async fn try_promote(&self, key: &str, reason: &str, priority: f64) -> Result<bool, StorageError>;

    /// Store `priority` only while the record is promoted.
    async fn set_priority(&self, key: &str, priority: f64) -> Result<bool, StorageError>;

    /// All promoted records, `priority` descending, ties by `last_viewed_at` descending.
    async fn promoted(&self) -> Result<Vec<AnalysisRecord>, StorageError>;

    /// Compare-and-set `is_promoted` from true to false, resetting priority.
    /// Returns `false` if the record was not promoted.
    async fn demote(&self, key: &str, reason: &str) -> Result<bool, StorageError>;
}

/// Ordering used by [`RecordStore::promoted`].
pub fn rank_promoted(records: &mut [AnalysisRecord]) {
    records.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_viewed_at.unwrap_or(0).cmp(&a.last_viewed_at.unwrap_or(0)))
            .then_with(|| a.key.cmp(&b.key))
    });
}
