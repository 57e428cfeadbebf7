// Key-value storage backends for the persistent cache
// The cache only needs get/set/remove/keys plus a quota signal on write

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The write would push the store past its byte quota
    #[error("storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("storage database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

/// Durable string store used by [`super::PersistentCache`]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace a value; fails with `QuotaExceeded` when it does not fit
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// All `(key, value)` pairs whose key starts with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let mut entries = Vec::new();
        for key in self.keys().await? {
            if !key.starts_with(prefix) {
                continue;
            }
            // A key may disappear between listing and reading
            if let Some(value) = self.get(&key).await? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    /// Total bytes (keys included) of entries whose key starts with `prefix`
    async fn prefix_size(&self, prefix: &str) -> Result<u64, StorageError> {
        Ok(self
            .scan_prefix(prefix)
            .await?
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// In-process store with a byte quota
#[derive(Debug)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: u64,
}

impl MemoryStorage {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes,
        }
    }

    /// Bytes currently held, keys included
    #[cfg(test)]
    pub fn used_bytes(&self) -> u64 {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let used: u64 = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        let needed = entry_size(key, value);

        if used + needed > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.quota_bytes.saturating_sub(used),
            });
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    async fn prefix_size(&self, prefix: &str) -> Result<u64, StorageError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }
}

/// SQLite-backed store (table `cache_store`, created by `db::migrate`)
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    quota_bytes: u64,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool, quota_bytes: u64) -> Self {
        Self { pool, quota_bytes }
    }

    async fn used_bytes_excluding(&self, key: &str) -> Result<u64, StorageError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM cache_store WHERE key != ?",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.max(0) as u64)
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM cache_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let used = self.used_bytes_excluding(key).await?;
        let needed = entry_size(key, value);

        if used + needed > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.quota_bytes.saturating_sub(used),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO cache_store (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM cache_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM cache_store ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM cache_store WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn prefix_size(&self, prefix: &str) -> Result<u64, StorageError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM cache_store WHERE substr(key, 1, ?) = ?",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_quota() {
        let storage = MemoryStorage::new(10);
        storage.set("ab", "cdef").await.unwrap();
        assert_eq!(storage.used_bytes(), 6);

        let err = storage.set("gh", "ijk").await.unwrap_err();
        assert!(err.is_quota_exceeded());

        // Replacing an entry only counts the new size
        storage.set("ab", "cdefghij").await.unwrap();
        assert_eq!(storage.get("ab").await.unwrap().as_deref(), Some("cdefghij"));
    }

    #[tokio::test]
    async fn test_sqlite_storage_roundtrip_and_quota() {
        let pool = crate::db::test_pool().await;
        let storage = SqliteStorage::new(pool, 32);

        storage.set("one", "first").await.unwrap();
        storage.set("two", "second").await.unwrap();
        storage.set("one", "replaced").await.unwrap();

        assert_eq!(storage.get("one").await.unwrap().as_deref(), Some("replaced"));
        assert_eq!(storage.keys().await.unwrap(), vec!["one", "two"]);

        let err = storage
            .set("three", "this value is far too long")
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());

        storage.set("mh_x", "1").await.unwrap();
        let scanned = storage.scan_prefix("mh_").await.unwrap();
        assert_eq!(scanned, vec![("mh_x".to_string(), "1".to_string())]);
        assert_eq!(storage.prefix_size("mh_").await.unwrap(), 5);
        assert_eq!(storage.prefix_size("none:").await.unwrap(), 0);

        storage.remove("one").await.unwrap();
        assert_eq!(storage.get("one").await.unwrap(), None);
        assert_eq!(storage.keys().await.unwrap(), vec!["mh_x", "two"]);
    }
}
