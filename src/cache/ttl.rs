// In-memory TTL cache
// Process-wide map of short-lived values, shared through AppState

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};

/// Default freshness window for in-memory entries
pub const DEFAULT_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Thread-safe map from string key to an expiring value
///
/// Every operation runs inside a single lock acquisition, so `get` checks
/// freshness, reads, and drops a stale entry as one step.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            clock,
        }
    }

    /// Store a value using the default TTL, replacing any previous entry
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with an explicit TTL
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        // expires_at must stay strictly after stored_at
        let ttl = ttl.max(Duration::milliseconds(1));
        let stored_at = self.clock.now();
        // Saturates instead of overflowing for very long TTLs
        let expires_at = stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = CacheEntry {
            value,
            stored_at,
            expires_at,
        };
        self.entries.lock().insert(key.into(), entry);
    }

    /// Get a fresh value, dropping the entry if it has expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(entry) => {
                tracing::trace!(
                    "Memory cache entry '{}' expired (stored {})",
                    key,
                    entry.stored_at
                );
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, stale ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stale entry, returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use chrono::TimeZone;

    fn cache_with_clock() -> (TtlCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let cache = TtlCache::with_clock(Duration::minutes(DEFAULT_TTL_MINUTES), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_get_returns_value_until_ttl_passes() {
        let (cache, clock) = cache_with_clock();

        for ttl_secs in [1, 30, 900, 86_400] {
            let key = format!("k{}", ttl_secs);
            cache.set_with_ttl(&key, "v".to_string(), Duration::seconds(ttl_secs));
            assert_eq!(cache.get(&key), Some("v".to_string()));

            clock.advance(Duration::seconds(ttl_secs) + Duration::milliseconds(1));
            assert_eq!(cache.get(&key), None);
            assert!(!cache.has(&key));
        }
    }

    #[test]
    fn test_default_ttl_is_fifteen_minutes() {
        let (cache, clock) = cache_with_clock();
        cache.set("search:frieren", "cached".to_string());

        clock.advance(Duration::minutes(14));
        assert!(cache.has("search:frieren"));

        clock.advance(Duration::minutes(2));
        assert!(!cache.has("search:frieren"));
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let (cache, clock) = cache_with_clock();
        cache.set_with_ttl("a", "1".to_string(), Duration::seconds(5));
        cache.set_with_ttl("b", "2".to_string(), Duration::minutes(5));
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::seconds(10));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some("2".to_string()));
    }

    #[test]
    fn test_set_overwrites_and_resets_expiry() {
        let (cache, clock) = cache_with_clock();
        cache.set_with_ttl("k", "old".to_string(), Duration::seconds(10));
        clock.advance(Duration::seconds(8));
        cache.set_with_ttl("k", "new".to_string(), Duration::seconds(10));
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.get("k"), Some("new".to_string()));
    }

    #[test]
    fn test_zero_ttl_still_readable_at_same_instant() {
        let (cache, clock) = cache_with_clock();
        cache.set_with_ttl("k", "v".to_string(), Duration::zero());
        assert_eq!(cache.get("k"), Some("v".to_string()));
        clock.advance(Duration::milliseconds(2));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_delete_clear_and_purge() {
        let (cache, clock) = cache_with_clock();
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.delete("a");
        assert!(!cache.has("a"));
        assert!(cache.has("b"));

        cache.clear();
        assert!(cache.is_empty());

        cache.set_with_ttl("short", "x".to_string(), Duration::seconds(1));
        cache.set("long", "y".to_string());
        clock.advance(Duration::seconds(2));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let (cache, clock) = cache_with_clock();
        cache.set_with_ttl("forever", "v".to_string(), Duration::MAX);
        assert_eq!(cache.get("forever"), Some("v".to_string()));

        clock.advance(Duration::days(365 * 100));
        assert!(cache.has("forever"));
    }
}
