//! Redis record store.
//!
//! Each analysis record is spread over three keys plus one shared index:
//!
//! ```text
//! {prefix}record:{key}           HASH   payload, computed_at, view_count,
//!                                       unique_viewer_count, is_promoted,
//!                                       promotion_reason, priority, last_viewed_at
//! {prefix}record:{key}:viewers   SET    viewer ids ever recorded
//! {prefix}record:{key}:history   LIST   JSON view events, oldest first
//! {prefix}promoted               ZSET   promoted keys scored by priority
//! ```
//!
//! Every mutation is a single command or a Lua script, so counters and the
//! promotion flag are updated atomically on the server.

use std::collections::{HashMap, HashSet};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde_json::Value;
use tracing::debug;
use crate::record::{AnalysisRecord, ViewEvent};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{rank_promoted, RecordStore, StorageError, ViewCounters, ViewerInsert};

const INCREMENT_VIEW_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return false end
local views = redis.call('HINCRBY', KEYS[1], 'view_count', 1)
redis.call('HSET', KEYS[1], 'last_viewed_at', ARGV[1])
redis.call('RPUSH', KEYS[2], ARGV[2])
redis.call('LTRIM', KEYS[2], -tonumber(ARGV[3]), -1)
local unique = tonumber(redis.call('HGET', KEYS[1], 'unique_viewer_count') or '0') or 0
local promoted = 0
if redis.call('HGET', KEYS[1], 'is_promoted') == '1' then promoted = 1 end
return {views, unique, promoted}
"#;

const ADD_VIEWER_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {0, 0, 0} end
local added = redis.call('SADD', KEYS[2], ARGV[1])
local unique
if added == 1 then
  unique = redis.call('HINCRBY', KEYS[1], 'unique_viewer_count', 1)
else
  unique = tonumber(redis.call('HGET', KEYS[1], 'unique_viewer_count') or '0') or 0
end
local views = tonumber(redis.call('HGET', KEYS[1], 'view_count') or '0') or 0
return {added, unique, views}
"#;

const TRY_PROMOTE_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
if redis.call('HGET', KEYS[1], 'is_promoted') == '1' then return 0 end
redis.call('HSET', KEYS[1], 'is_promoted', '1', 'promotion_reason', ARGV[1], 'priority', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

const SET_PRIORITY_LUA: &str = r#"
if redis.call('HGET', KEYS[1], 'is_promoted') ~= '1' then return 0 end
redis.call('HSET', KEYS[1], 'priority', ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
return 1
"#;

const DEMOTE_LUA: &str = r#"
if redis.call('HGET', KEYS[1], 'is_promoted') ~= '1' then return 0 end
redis.call('HSET', KEYS[1], 'is_promoted', '0', 'promotion_reason', ARGV[1], 'priority', '0')
redis.call('ZREM', KEYS[2], ARGV[2])
return 1
"#;

struct Scripts {
    increment_view: Script,
    add_viewer: Script,
    try_promote: Script,
    set_priority: Script,
    demote: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            increment_view: Script::new(INCREMENT_VIEW_LUA),
            add_viewer: Script::new(ADD_VIEWER_LUA),
            try_promote: Script::new(TRY_PROMOTE_LUA),
            set_priority: Script::new(SET_PRIORITY_LUA),
            demote: Script::new(DEMOTE_LUA),
        }
    }
}

pub struct RedisRecordStore {
    connection: ConnectionManager,
    /// Namespace for every key (e.g., "analysis:")
    prefix: String,
    scripts: Scripts,
}

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl RedisRecordStore {
    /// Connect with the default `analysis:` prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, "analysis:").await
    }

    /// Connect, namespacing every key under `prefix`.
    ///
    /// Uses the startup retry policy so a bad URL fails within seconds.
    pub async fn with_prefix(connection_string: &str, prefix: &str) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(backend)?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self::from_connection(connection, prefix))
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: ConnectionManager, prefix: &str) -> Self {
        Self {
            connection,
            prefix: prefix.to_string(),
            scripts: Scripts::load(),
        }
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}record:{}", self.prefix, key)
    }

    fn viewers_key(&self, key: &str) -> String {
        format!("{}record:{}:viewers", self.prefix, key)
    }

    fn history_key(&self, key: &str) -> String {
        format!("{}record:{}:history", self.prefix, key)
    }

    fn promoted_key(&self) -> String {
        format!("{}promoted", self.prefix)
    }

    /// Rebuild a record from its hash, viewer set and history list.
    ///
    /// The payload must parse; counters that are missing or malformed read
    /// as zero.
    fn parse_record(
        key: &str,
        fields: HashMap<String, String>,
        viewers: HashSet<String>,
        history: Vec<String>,
    ) -> Result<AnalysisRecord, StorageError> {
        let malformed = |reason: String| StorageError::Malformed { key: key.to_string(), reason };

        let payload: Value = match fields.get("payload") {
            Some(raw) => serde_json::from_str(raw).map_err(|e| malformed(format!("payload: {}", e)))?,
            None => return Err(malformed("missing payload".to_string())),
        };
        let int = |name: &str| fields.get(name).and_then(|v| v.parse::<i64>().ok());

        let mut record = AnalysisRecord::new(key.to_string(), payload, int("computed_at").unwrap_or(0));
        record.view_count = int("view_count").unwrap_or(0).max(0) as u64;
        record.unique_viewer_count = int("unique_viewer_count").unwrap_or(0).max(0) as u64;
        record.is_promoted = fields.get("is_promoted").map(String::as_str) == Some("1");
        record.promotion_reason = fields.get("promotion_reason").cloned();
        record.priority = fields
            .get("priority")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|p| p.is_finite())
            .unwrap_or(0.0);
        record.last_viewed_at = int("last_viewed_at");
        record.viewed_by = viewers;
        for raw in history {
            match serde_json::from_str::<ViewEvent>(&raw) {
                Ok(event) => record.view_history.push_back(event),
                Err(e) => debug!(key = %key, error = %e, "Skipping unreadable view event"),
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn get(&self, key: &str) -> Result<Option<AnalysisRecord>, StorageError> {
        let conn = self.connection.clone();
        let record_key = self.record_key(key);
        let viewers_key = self.viewers_key(key);
        let history_key = self.history_key(key);

        let (fields, viewers, history): (HashMap<String, String>, HashSet<String>, Vec<String>) =
            retry("redis_record_get", &RetryConfig::query(), || {
                let mut conn = conn.clone();
                let mut pipeline = redis::pipe();
                pipeline
                    .atomic()
                    .hgetall(&record_key)
                    .smembers(&viewers_key)
                    .lrange(&history_key, 0, -1);
                async move { pipeline.query_async(&mut conn).await }
            })
            .await
            .map_err(backend)?;

        if fields.is_empty() {
            return Ok(None);
        }
        Self::parse_record(key, fields, viewers, history).map(Some)
    }

    async fn upsert_payload(&self, key: &str, payload: &Value, computed_at: i64) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let record_key = self.record_key(key);
        let payload = serde_json::to_string(payload).map_err(|e| StorageError::Backend(e.to_string()))?;
        let computed_at = computed_at.to_string();

        retry("redis_upsert_payload", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let record_key = record_key.clone();
            let fields = [("payload", payload.clone()), ("computed_at", computed_at.clone())];
            async move { conn.hset_multiple::<_, _, _, ()>(&record_key, &fields).await }
        })
        .await
        .map_err(backend)
    }

    // Counter scripts are not retried: replaying after a lost reply would double count.
    async fn increment_view(
        &self,
        key: &str,
        event: &ViewEvent,
        history_capacity: usize,
    ) -> Result<Option<ViewCounters>, StorageError> {
        let mut conn = self.connection.clone();
        let event_json = serde_json::to_string(event).map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut invocation = self.scripts.increment_view.prepare_invoke();
        invocation
            .key(self.record_key(key))
            .key(self.history_key(key))
            .arg(event.timestamp)
            .arg(event_json)
            .arg(history_capacity.max(1));
        let reply: Option<(i64, i64, i64)> = invocation.invoke_async(&mut conn).await.map_err(backend)?;

        Ok(reply.map(|(views, unique, promoted)| ViewCounters {
            view_count: views.max(0) as u64,
            unique_viewer_count: unique.max(0) as u64,
            is_promoted: promoted == 1,
            last_viewed_at: event.timestamp,
        }))
    }

    async fn add_viewer(&self, key: &str, viewer_id: &str) -> Result<ViewerInsert, StorageError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.scripts.add_viewer.prepare_invoke();
        invocation
            .key(self.record_key(key))
            .key(self.viewers_key(key))
            .arg(viewer_id);
        let (added, unique, views): (i64, i64, i64) = invocation.invoke_async(&mut conn).await.map_err(backend)?;

        Ok(ViewerInsert {
            newly_added: added == 1,
            unique_viewer_count: unique.max(0) as u64,
            view_count: views.max(0) as u64,
        })
    }

    async fn try_promote(&self, key: &str, reason: &str, priority: f64) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.scripts.try_promote.prepare_invoke();
        invocation
            .key(self.record_key(key))
            .key(self.promoted_key())
            .arg(reason)
            .arg(priority)
            .arg(key);
        let promoted: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        Ok(promoted == 1)
    }

    async fn set_priority(&self, key: &str, priority: f64) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.scripts.set_priority.prepare_invoke();
        invocation
            .key(self.record_key(key))
            .key(self.promoted_key())
            .arg(priority)
            .arg(key);
        let updated: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        Ok(updated == 1)
    }

    async fn promoted(&self) -> Result<Vec<AnalysisRecord>, StorageError> {
        let conn = self.connection.clone();
        let promoted_key = self.promoted_key();

        let keys: Vec<String> = retry("redis_promoted_index", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let promoted_key = promoted_key.clone();
            async move { conn.zrevrange(&promoted_key, 0, -1).await }
        })
        .await
        .map_err(backend)?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // The index may briefly lag the hash; the hash flag is authoritative.
            if let Some(record) = self.get(&key).await? {
                if record.is_promoted {
                    records.push(record);
                }
            }
        }
        rank_promoted(&mut records);
        Ok(records)
    }

    async fn demote(&self, key: &str, reason: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.scripts.demote.prepare_invoke();
        invocation
            .key(self.record_key(key))
            .key(self.promoted_key())
            .arg(reason)
            .arg(key);
        let demoted: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        Ok(demoted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_full_record() {
        let event = serde_json::to_string(&ViewEvent::new("alice", 7, json!({"page": "match"}))).unwrap();
        let record = RedisRecordStore::parse_record(
            "github.com/a/b",
            fields(&[
                ("payload", r#"{"summary":"ok"}"#),
                ("computed_at", "100"),
                ("view_count", "3"),
                ("unique_viewer_count", "2"),
                ("is_promoted", "1"),
                ("promotion_reason", "2 views"),
                ("priority", "7.5"),
                ("last_viewed_at", "7"),
            ]),
            ["alice".to_string(), "bob".to_string()].into_iter().collect(),
            vec![event],
        )
        .unwrap();

        assert_eq!(record.payload, json!({"summary": "ok"}));
        assert_eq!(record.computed_at, 100);
        assert_eq!(record.view_count, 3);
        assert_eq!(record.unique_viewer_count, 2);
        assert!(record.is_promoted);
        assert_eq!(record.priority, 7.5);
        assert_eq!(record.last_viewed_at, Some(7));
        assert_eq!(record.viewed_by.len(), 2);
        assert_eq!(record.view_history.len(), 1);
    }

    #[test]
    fn test_parse_malformed_counters_read_as_zero() {
        let record = RedisRecordStore::parse_record(
            "k",
            fields(&[("payload", "null"), ("view_count", "lots"), ("priority", "NaN")]),
            HashSet::new(),
            vec!["not json".to_string()],
        )
        .unwrap();

        assert_eq!(record.view_count, 0);
        assert_eq!(record.priority, 0.0);
        assert_eq!(record.computed_at, 0);
        assert!(record.view_history.is_empty());
    }

    #[test]
    fn test_parse_missing_payload_is_malformed() {
        let err = RedisRecordStore::parse_record("k", fields(&[("view_count", "1")]), HashSet::new(), vec![])
            .unwrap_err();
        assert!(matches!(err, StorageError::Malformed { .. }));
    }
}
