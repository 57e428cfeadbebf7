// Persistent response cache
// Provider responses are stored as JSON records in a StorageBackend, aged out
// after a TTL, and evicted oldest-first once the total size passes a ceiling.
// Writes are best effort: a failed write never turns a fetched value into an error.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::storage::{StorageBackend, StorageError};

/// Every key owned by the cache starts with this prefix
pub const CACHE_KEY_PREFIX: &str = "mh_cache:";

pub const DEFAULT_TTL_HOURS: i64 = 24;

/// 50 MiB
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// What a cached record holds; part of the key so kinds can be invalidated separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    VideoDetails,
    RelatedVideos,
    Search,
    Trending,
    Channel,
    Category,
    Query,
    MovieDetails,
    ShowDetails,
    Season,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::VideoDetails => "video_details",
            ContentKind::RelatedVideos => "related_videos",
            ContentKind::Search => "search",
            ContentKind::Trending => "trending",
            ContentKind::Channel => "channel",
            ContentKind::Category => "category",
            ContentKind::Query => "query",
            ContentKind::MovieDetails => "movie_details",
            ContentKind::ShowDetails => "show_details",
            ContentKind::Season => "season",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar request parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Str(value.clone())
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Identity of a cacheable request: content kind, optional subject, scalar params
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    kind: ContentKind,
    subject_id: Option<String>,
    params: BTreeMap<String, ParamValue>,
}

impl CacheRequest {
    pub fn new(kind: ContentKind) -> Self {
        Self {
            kind,
            subject_id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Adds the parameter only when a value is present
    pub fn param_opt<V: Into<ParamValue>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Storage key: `mh_cache:{kind}[:{subject}][?{name=value&...}]`
    ///
    /// Parameter names are kept sorted, so two requests with the same
    /// parameters produce the same key whatever order they were added in.
    pub fn key(&self) -> String {
        let mut key = format!("{}{}", CACHE_KEY_PREFIX, self.kind.as_str());

        if let Some(ref subject) = self.subject_id {
            key.push(':');
            key.push_str(&urlencoding::encode(subject));
        }

        if !self.params.is_empty() {
            let query = self
                .params
                .iter()
                .map(|(name, value)| {
                    format!(
                        "{}={}",
                        urlencoding::encode(name),
                        urlencoding::encode(&value.to_string())
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            key.push('?');
            key.push_str(&query);
        }

        key
    }
}

/// Record as written to the backend
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    payload: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    stored_at: DateTime<Utc>,
    kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject_id: Option<String>,
}

/// Record metadata without the payload, used for sweeps and eviction
#[derive(Debug, Deserialize)]
struct RecordHeader {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    stored_at: DateTime<Utc>,
    kind: ContentKind,
    #[serde(default)]
    subject_id: Option<String>,
}

#[derive(Debug)]
struct ScannedRecord {
    key: String,
    size: u64,
    /// None when the stored JSON is unreadable
    header: Option<RecordHeader>,
}

impl ScannedRecord {
    fn stored_at(&self) -> Option<DateTime<Utc>> {
        self.header.as_ref().map(|h| h.stored_at)
    }
}

/// Read-only diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub subject_scoped_entries: usize,
    pub total_size_estimate: u64,
}

fn record_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

pub struct PersistentCache {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_size_bytes: u64,
}

impl PersistentCache {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `request`, or run `fetcher` and cache its result
    ///
    /// Errors from `fetcher` are returned unchanged and nothing is stored.
    /// Concurrent misses on the same key may all fetch; the last write wins.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, request: &CacheRequest, fetcher: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = request.key();

        if let Some(value) = self.lookup::<T>(&key).await {
            tracing::debug!("Cache hit: {}", key);
            return Ok(value);
        }

        tracing::debug!("Cache miss: {}", key);
        let value = fetcher().await?;
        self.store(&key, request, &value).await;
        Ok(value)
    }

    fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - stored_at > self.ttl
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let record: StoredRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Dropping corrupted cache record {}: {}", key, e);
                self.remove_quietly(key).await;
                return None;
            }
        };

        if self.is_expired(record.stored_at, self.clock.now()) {
            tracing::debug!("Cache record expired: {}", key);
            self.remove_quietly(key).await;
            return None;
        }

        match serde_json::from_value(record.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Dropping undecodable cache record {}: {}", key, e);
                self.remove_quietly(key).await;
                None
            }
        }
    }

    async fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.storage.remove(key).await {
            tracing::debug!("Failed to remove cache record {}: {}", key, e);
        }
    }

    /// Best-effort write; every failure ends in a log line, never an error
    async fn store<T: Serialize>(&self, key: &str, request: &CacheRequest, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("Not caching {}: serialization failed: {}", key, e);
                return;
            }
        };

        let record = StoredRecord {
            payload,
            stored_at: self.clock.now(),
            kind: request.kind,
            subject_id: request.subject_id.clone(),
        };

        let serialized = match serde_json::to_string(&record) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("Not caching {}: serialization failed: {}", key, e);
                return;
            }
        };

        let size = record_size(key, &serialized);
        if size > self.max_size_bytes {
            tracing::debug!(
                "Not caching {}: {} bytes exceeds the {} byte ceiling",
                key,
                size,
                self.max_size_bytes
            );
            return;
        }

        self.enforce_ceiling(key, size).await;

        match self.storage.set(key, &serialized).await {
            Ok(()) => {}
            Err(e) if e.is_quota_exceeded() => {
                tracing::debug!("Storage quota hit writing {}, evicting and retrying", key);
                self.evict_for(key, size).await;
                if let Err(e) = self.storage.set(key, &serialized).await {
                    tracing::debug!("Dropping cache write for {}: {}", key, e);
                }
            }
            Err(e) => {
                tracing::debug!("Dropping cache write for {}: {}", key, e);
            }
        }
    }

    /// Evict oldest records until `incoming` more bytes fit under the ceiling
    async fn enforce_ceiling(&self, key: &str, incoming: u64) {
        // Cheap total first; it also counts a record being replaced, so a
        // pass here is always safe and a miss falls through to the full scan
        match self.storage.prefix_size(CACHE_KEY_PREFIX).await {
            Ok(total) if total.saturating_add(incoming) <= self.max_size_bytes => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Skipping size check, size query failed: {}", e);
                return;
            }
        }

        let records = match self.scan().await {
            Ok(records) => records,
            Err(e) => {
                tracing::debug!("Skipping size check, scan failed: {}", e);
                return;
            }
        };

        // The record being replaced does not count against the new total
        let mut candidates: Vec<ScannedRecord> =
            records.into_iter().filter(|r| r.key != key).collect();
        let mut total: u64 = candidates.iter().map(|r| r.size).sum();

        if total + incoming <= self.max_size_bytes {
            return;
        }

        // Unreadable records sort first (None < Some)
        candidates.sort_by_key(|r| r.stored_at());

        let mut evicted = 0usize;
        for record in candidates {
            if total + incoming <= self.max_size_bytes {
                break;
            }
            self.remove_quietly(&record.key).await;
            total = total.saturating_sub(record.size);
            evicted += 1;
        }

        tracing::debug!(
            "Evicted {} cache records, {} bytes remain before write",
            evicted,
            total
        );
    }

    /// Second-chance eviction after the backend refused a write:
    /// frees at least `incoming` bytes and at least one record
    async fn evict_for(&self, key: &str, incoming: u64) {
        let mut candidates: Vec<ScannedRecord> = match self.scan().await {
            Ok(records) => records.into_iter().filter(|r| r.key != key).collect(),
            Err(e) => {
                tracing::debug!("Eviction scan failed: {}", e);
                return;
            }
        };
        candidates.sort_by_key(|r| r.stored_at());

        let mut freed = 0u64;
        for record in candidates {
            self.remove_quietly(&record.key).await;
            freed += record.size;
            if freed >= incoming {
                break;
            }
        }
    }

    async fn scan(&self) -> Result<Vec<ScannedRecord>, StorageError> {
        let entries = self.storage.scan_prefix(CACHE_KEY_PREFIX).await?;

        Ok(entries
            .into_iter()
            .map(|(key, value)| ScannedRecord {
                size: record_size(&key, &value),
                header: serde_json::from_str(&value).ok(),
                key,
            })
            .collect())
    }

    /// Remove every record older than the TTL, plus unreadable ones
    pub async fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        self.remove_where(|record| match record.stored_at() {
            Some(stored_at) => self.is_expired(stored_at, now),
            None => true,
        })
        .await
    }

    pub async fn clear_all(&self) -> usize {
        self.remove_where(|_| true).await
    }

    pub async fn clear_for_subject(&self, subject_id: &str) -> usize {
        self.remove_where(|record| {
            record
                .header
                .as_ref()
                .and_then(|h| h.subject_id.as_deref())
                == Some(subject_id)
        })
        .await
    }

    pub async fn clear_kind(&self, kind: ContentKind) -> usize {
        self.remove_where(|record| record.header.as_ref().map(|h| h.kind) == Some(kind))
            .await
    }

    async fn remove_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&ScannedRecord) -> bool,
    {
        let records = match self.scan().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Cache scan failed: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for record in records.iter().filter(|r| predicate(r)) {
            match self.storage.remove(&record.key).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!("Failed to remove {}: {}", record.key, e),
            }
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let records = match self.scan().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Cache scan failed: {}", e);
                return CacheStats::default();
            }
        };

        let now = self.clock.now();
        let mut stats = CacheStats {
            total_entries: records.len(),
            ..Default::default()
        };

        for record in &records {
            stats.total_size_estimate += record.size;
            match record.header {
                Some(ref header) => {
                    if self.is_expired(header.stored_at, now) {
                        stats.expired_entries += 1;
                    }
                    if header.subject_id.is_some() {
                        stats.subject_scoped_entries += 1;
                    }
                }
                None => stats.expired_entries += 1,
            }
        }

        stats
    }
}
