use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use crate::record::{AnalysisRecord, ViewEvent};
use super::traits::{rank_promoted, RecordStore, StorageError, ViewCounters, ViewerInsert};

/// Process-local record store.
///
/// Each mutation runs under the DashMap shard lock for its key, which makes
/// every trait operation atomic with respect to concurrent callers.
pub struct InMemoryRecordStore {
    data: DashMap<String, AnalysisRecord>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Insert a fully formed record, replacing any existing one.
    pub fn insert(&self, record: AnalysisRecord) {
        self.data.insert(record.key.clone(), record);
    }

    /// Clear all records
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<AnalysisRecord>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn upsert_payload(&self, key: &str, payload: &Value, computed_at: i64) -> Result<(), StorageError> {
        self.data
            .entry(key.to_string())
            .and_modify(|record| {
                record.payload = payload.clone();
                record.computed_at = computed_at;
            })
            .or_insert_with(|| AnalysisRecord::new(key.to_string(), payload.clone(), computed_at));
        Ok(())
    }

    async fn increment_view(
        &self,
        key: &str,
        event: &ViewEvent,
        history_capacity: usize,
    ) -> Result<Option<ViewCounters>, StorageError> {
        let Some(mut record) = self.data.get_mut(key) else {
            return Ok(None);
        };
        record.view_count = record.view_count.saturating_add(1);
        record.last_viewed_at = Some(event.timestamp);
        record.push_view(event.clone(), history_capacity);

        Ok(Some(ViewCounters {
            view_count: record.view_count,
            unique_viewer_count: record.unique_viewer_count,
            is_promoted: record.is_promoted,
            last_viewed_at: event.timestamp,
        }))
    }

    async fn add_viewer(&self, key: &str, viewer_id: &str) -> Result<ViewerInsert, StorageError> {
        let Some(mut record) = self.data.get_mut(key) else {
            return Ok(ViewerInsert { newly_added: false, unique_viewer_count: 0, view_count: 0 });
        };
        let newly_added = record.viewed_by.insert(viewer_id.to_string());
        if newly_added {
            record.unique_viewer_count = record.unique_viewer_count.saturating_add(1);
        }
        Ok(ViewerInsert {
            newly_added,
            unique_viewer_count: record.unique_viewer_count,
            view_count: record.view_count,
        })
    }

    async fn try_promote(&self, key: &str, reason: &str, priority: f64) -> Result<bool, StorageError> {
        let Some(mut record) = self.data.get_mut(key) else {
            return Ok(false);
        };
        if record.is_promoted {
            return Ok(false);
        }
        record.is_promoted = true;
        record.promotion_reason = Some(reason.to_string());
        record.priority = priority;
        Ok(true)
    }

    async fn set_priority(&self, key: &str, priority: f64) -> Result<bool, StorageError> {
        match self.data.get_mut(key) {
            Some(mut record) if record.is_promoted => {
                record.priority = priority;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn promoted(&self) -> Result<Vec<AnalysisRecord>, StorageError> {
        let mut records: Vec<AnalysisRecord> = self
            .data
            .iter()
            .filter(|r| r.value().is_promoted)
            .map(|r| r.value().clone())
            .collect();
        rank_promoted(&mut records);
        Ok(records)
    }

    async fn demote(&self, key: &str, reason: &str) -> Result<bool, StorageError> {
        match self.data.get_mut(key) {
            Some(mut record) if record.is_promoted => {
                record.demote(reason);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn view(viewer: &str, ts: i64) -> ViewEvent {
        ViewEvent::new(viewer, ts, json!({"page": "repo"}))
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryRecordStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_preserves_counters() {
        let store = InMemoryRecordStore::new();
        store.upsert_payload("repo", &json!({"v": 1}), 10).await.unwrap();
        store.increment_view("repo", &view("alice", 11), 100).await.unwrap();

        store.upsert_payload("repo", &json!({"v": 2}), 20).await.unwrap();

        let record = store.get("repo").await.unwrap().unwrap();
        assert_eq!(record.payload, json!({"v": 2}));
        assert_eq!(record.computed_at, 20);
        assert_eq!(record.view_count, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = InMemoryRecordStore::new();
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_view_on_missing_record() {
        let store = InMemoryRecordStore::new();
        let counters = store.increment_view("missing", &view("alice", 1), 100).await.unwrap();
        assert!(counters.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_add_viewer_counts_once() {
        let store = InMemoryRecordStore::new();
        store.upsert_payload("repo", &json!(null), 0).await.unwrap();

        let first = store.add_viewer("repo", "alice").await.unwrap();
        let again = store.add_viewer("repo", "alice").await.unwrap();
        let other = store.add_viewer("repo", "bob").await.unwrap();

        assert!(first.newly_added);
        assert!(!again.newly_added);
        assert_eq!(again.unique_viewer_count, 1);
        assert_eq!(other.unique_viewer_count, 2);
    }

    #[tokio::test]
    async fn test_try_promote_is_compare_and_set() {
        let store = InMemoryRecordStore::new();
        store.upsert_payload("repo", &json!(null), 0).await.unwrap();

        assert!(store.try_promote("repo", "popular", 3.0).await.unwrap());
        assert!(!store.try_promote("repo", "popular again", 9.0).await.unwrap());

        let record = store.get("repo").await.unwrap().unwrap();
        assert_eq!(record.priority, 3.0);
        assert_eq!(record.promotion_reason.as_deref(), Some("popular"));
    }

    #[tokio::test]
    async fn test_set_priority_ignored_when_not_promoted() {
        let store = InMemoryRecordStore::new();
        store.upsert_payload("repo", &json!(null), 0).await.unwrap();

        assert!(!store.set_priority("repo", 5.0).await.unwrap());
        assert_eq!(store.get("repo").await.unwrap().unwrap().priority, 0.0);
    }

    #[tokio::test]
    async fn test_promoted_ordering_breaks_ties_by_last_view() {
        let store = InMemoryRecordStore::new();
        for (key, priority, last) in [("a", 1.0, 5), ("b", 2.0, 1), ("c", 1.0, 9)] {
            let mut r = AnalysisRecord::new(key.into(), json!(null), 0);
            r.is_promoted = true;
            r.priority = priority;
            r.last_viewed_at = Some(last);
            store.insert(r);
        }
        store.upsert_payload("not-promoted", &json!(null), 0).await.unwrap();

        let keys: Vec<String> = store.promoted().await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_concurrent_views_lose_no_increments() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.upsert_payload("repo", &json!(null), 0).await.unwrap();

        let mut handles = vec![];
        for task in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let viewer = format!("viewer-{}", i % 3);
                    store.increment_view("repo", &view(&viewer, task * 10 + i), 100).await.unwrap();
                    store.add_viewer("repo", &viewer).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get("repo").await.unwrap().unwrap();
        assert_eq!(record.view_count, 100);
        assert_eq!(record.unique_viewer_count, 3);
        assert_eq!(record.view_history.len(), 100);
    }
}
