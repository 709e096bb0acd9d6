//! Cache store trait with in-memory and SQLite implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::types::{CachedResponse, Headers, RequestKey, ResourceResponse, ResponseType};
use crate::error::{CacheError, Result};

/// Handle to an opened bucket. Obtained from [`CacheStore::open_bucket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
  name: String,
}

impl Bucket {
  pub fn name(&self) -> &str {
    &self.name
  }
}

/// Persistent key→response store partitioned into named buckets.
///
/// Puts are atomic per key. There are no multi-entry transactions.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Open a bucket, creating it if it does not exist.
  async fn open_bucket(&self, name: &str) -> Result<Bucket>;

  /// Look up the entry stored under `key`.
  async fn get(&self, bucket: &Bucket, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a snapshot of `response` under `key`, replacing any existing entry.
  async fn put(&self, bucket: &Bucket, key: &RequestKey, response: &ResourceResponse)
    -> Result<()>;

  /// Delete a bucket and every entry in it. Returns false if it did not exist.
  async fn delete_bucket(&self, name: &str) -> Result<bool>;

  /// Names of all buckets.
  async fn bucket_names(&self) -> Result<Vec<String>>;

  /// Keys of every entry in a bucket.
  async fn keys(&self, bucket: &Bucket) -> Result<Vec<RequestKey>>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
  key: RequestKey,
  cached: CachedResponse,
}

type MemoryBuckets = BTreeMap<String, HashMap<String, MemoryEntry>>;

/// Store that keeps everything in process memory.
/// Used for ephemeral runs and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
  buckets: Mutex<MemoryBuckets>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemoryBuckets>> {
    self
      .buckets
      .lock()
      .map_err(|e| CacheError::storage("Lock poisoned", e))
  }

  /// Insert an entry with an explicit timestamp.
  #[cfg(test)]
  pub fn insert_at(
    &self,
    bucket: &str,
    key: &RequestKey,
    response: &ResourceResponse,
    cached_at: DateTime<Utc>,
  ) {
    let mut buckets = self.lock().unwrap();
    buckets.entry(bucket.to_string()).or_default().insert(
      key.cache_hash(),
      MemoryEntry {
        key: key.clone(),
        cached: CachedResponse {
          response: response.clone(),
          cached_at,
        },
      },
    );
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  async fn open_bucket(&self, name: &str) -> Result<Bucket> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(Bucket {
      name: name.to_string(),
    })
  }

  async fn get(&self, bucket: &Bucket, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let buckets = self.lock()?;
    Ok(
      buckets
        .get(&bucket.name)
        .and_then(|entries| entries.get(&key.cache_hash()))
        .map(|entry| entry.cached.clone()),
    )
  }

  async fn put(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    response: &ResourceResponse,
  ) -> Result<()> {
    let mut buckets = self.lock()?;
    buckets.entry(bucket.name.clone()).or_default().insert(
      key.cache_hash(),
      MemoryEntry {
        key: key.clone(),
        cached: CachedResponse {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      },
    );
    Ok(())
  }

  async fn delete_bucket(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  async fn bucket_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  async fn keys(&self, bucket: &Bucket) -> Result<Vec<RequestKey>> {
    let buckets = self.lock()?;
    let mut keys: Vec<RequestKey> = buckets
      .get(&bucket.name)
      .map(|entries| entries.values().map(|e| e.key.clone()).collect())
      .unwrap_or_default();
    keys.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
    Ok(keys)
  }
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::storage("Failed to create cache directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::storage(
        &format!("Failed to open cache database at {}", path.display()),
        e,
      )
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("offline-cache").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::storage("Lock poisoned", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::storage("Failed to run cache migrations", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached request, keyed by sha256("METHOD url")
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    response_url TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (bucket, key_hash),
    FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
);
"#;

#[async_trait]
impl CacheStore for SqliteStore {
  async fn open_bucket(&self, name: &str) -> Result<Bucket> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| CacheError::storage("Failed to open bucket", e))?;

    Ok(Bucket {
      name: name.to_string(),
    })
  }

  async fn get(&self, bucket: &Bucket, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<StoredRow> = conn
      .query_row(
        "SELECT status, status_text, headers, body, response_type, response_url, cached_at
         FROM entries WHERE bucket = ? AND key_hash = ?",
        params![bucket.name, key.cache_hash()],
        |row| {
          Ok(StoredRow {
            status: row.get(0)?,
            status_text: row.get(1)?,
            headers: row.get(2)?,
            body: row.get(3)?,
            response_type: row.get(4)?,
            response_url: row.get(5)?,
            cached_at: row.get(6)?,
          })
        },
      )
      .optional()
      .map_err(|e| CacheError::storage("Failed to read entry", e))?;

    row.map(StoredRow::into_cached).transpose()
  }

  async fn put(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    response: &ResourceResponse,
  ) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| CacheError::storage("Failed to serialize headers", e))?;
    let cached_at = Utc::now().to_rfc3339();

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::storage("Failed to begin transaction", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
      params![bucket.name],
    )
    .map_err(|e| CacheError::storage("Failed to open bucket", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries
         (bucket, key_hash, method, url, status, status_text, headers, body,
          response_type, response_url, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        bucket.name,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        response.status_text,
        headers,
        response.body,
        response.response_type.as_str(),
        response.url,
        cached_at,
      ],
    )
    .map_err(|e| CacheError::storage("Failed to store entry", e))?;

    tx.commit()
      .map_err(|e| CacheError::storage("Failed to commit transaction", e))
  }

  async fn delete_bucket(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::storage("Failed to begin transaction", e))?;

    tx.execute("DELETE FROM entries WHERE bucket = ?", params![name])
      .map_err(|e| CacheError::storage("Failed to delete entries", e))?;
    let removed = tx
      .execute("DELETE FROM buckets WHERE name = ?", params![name])
      .map_err(|e| CacheError::storage("Failed to delete bucket", e))?;

    tx.commit()
      .map_err(|e| CacheError::storage("Failed to commit transaction", e))?;

    Ok(removed > 0)
  }

  async fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY name")
      .map_err(|e| CacheError::storage("Failed to prepare query", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| CacheError::storage("Failed to list buckets", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| CacheError::storage("Failed to read bucket name", e))?;

    Ok(names)
  }

  async fn keys(&self, bucket: &Bucket) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE bucket = ? ORDER BY url, method")
      .map_err(|e| CacheError::storage("Failed to prepare query", e))?;

    let keys = stmt
      .query_map(params![bucket.name], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| CacheError::storage("Failed to list keys", e))?
      .collect::<rusqlite::Result<Vec<RequestKey>>>()
      .map_err(|e| CacheError::storage("Failed to read key", e))?;

    Ok(keys)
  }
}

/// Raw columns of an `entries` row.
struct StoredRow {
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  response_type: String,
  response_url: String,
  cached_at: String,
}

impl StoredRow {
  fn into_cached(self) -> Result<CachedResponse> {
    let headers: Headers = serde_json::from_str(&self.headers)
      .map_err(|e| CacheError::storage("Failed to deserialize headers", e))?;
    let response_type = ResponseType::parse(&self.response_type).ok_or_else(|| {
      CacheError::Storage(format!("Unknown response type '{}'", self.response_type))
    })?;

    Ok(CachedResponse {
      response: ResourceResponse {
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
        url: self.response_url,
        response_type,
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

/// Parse an RFC 3339 timestamp as written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| CacheError::storage(&format!("Failed to parse datetime '{}'", s), e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;

  fn response(body: &str) -> ResourceResponse {
    ResourceResponse {
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![
        ("content-type".to_string(), "text/html".to_string()),
        ("etag".to_string(), "\"abc\"".to_string()),
      ],
      body: body.as_bytes().to_vec(),
      url: "https://shop.test/index.html".to_string(),
      response_type: ResponseType::Basic,
    }
  }

  fn key(url: &str) -> RequestKey {
    RequestKey::new(&Method::GET, url)
  }

  async fn exercise_put_get_overwrite(store: &dyn CacheStore) {
    let bucket = store.open_bucket("v1").await.unwrap();
    let k = key("https://shop.test/index.html");

    assert!(store.get(&bucket, &k).await.unwrap().is_none());

    store.put(&bucket, &k, &response("first")).await.unwrap();
    store.put(&bucket, &k, &response("second")).await.unwrap();

    let cached = store.get(&bucket, &k).await.unwrap().unwrap();
    assert_eq!(cached.response.body, b"second");
    assert_eq!(cached.response.header("ETag"), Some("\"abc\""));
    assert_eq!(store.keys(&bucket).await.unwrap(), vec![k]);
  }

  async fn exercise_bucket_lifecycle(store: &dyn CacheStore) {
    let v1 = store.open_bucket("v1").await.unwrap();
    store.open_bucket("v1").await.unwrap();
    let v2 = store.open_bucket("v2").await.unwrap();
    let k = key("https://shop.test/");
    store.put(&v1, &k, &response("old")).await.unwrap();
    store.put(&v2, &k, &response("new")).await.unwrap();

    let mut names = store.bucket_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["v1".to_string(), "v2".to_string()]);

    assert!(store.delete_bucket("v1").await.unwrap());
    assert!(!store.delete_bucket("v1").await.unwrap());
    assert_eq!(store.bucket_names().await.unwrap(), vec!["v2".to_string()]);

    // Entries of the deleted bucket are gone, even if it is reopened.
    let v1 = store.open_bucket("v1").await.unwrap();
    assert!(store.get(&v1, &k).await.unwrap().is_none());
    assert_eq!(
      store.get(&v2, &k).await.unwrap().unwrap().response.body,
      b"new"
    );
  }

  #[tokio::test]
  async fn test_memory_put_get_overwrite() {
    exercise_put_get_overwrite(&MemoryStore::new()).await;
  }

  #[tokio::test]
  async fn test_memory_bucket_lifecycle() {
    exercise_bucket_lifecycle(&MemoryStore::new()).await;
  }

  #[tokio::test]
  async fn test_sqlite_put_get_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("cache.db")).unwrap();
    exercise_put_get_overwrite(&store).await;
  }

  #[tokio::test]
  async fn test_sqlite_bucket_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("cache.db")).unwrap();
    exercise_bucket_lifecycle(&store).await;
  }

  #[tokio::test]
  async fn test_sqlite_put_creates_missing_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("cache.db")).unwrap();
    let bucket = store.open_bucket("v1").await.unwrap();
    store.delete_bucket("v1").await.unwrap();

    store
      .put(&bucket, &key("https://shop.test/"), &response("x"))
      .await
      .unwrap();
    assert_eq!(store.bucket_names().await.unwrap(), vec!["v1".to_string()]);
  }

  #[tokio::test]
  async fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let k = key("https://shop.test/index.html");

    {
      let store = SqliteStore::open(&path).unwrap();
      let bucket = store.open_bucket("sina-shop-cache-v1").await.unwrap();
      store.put(&bucket, &k, &response("<html>")).await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let bucket = store.open_bucket("sina-shop-cache-v1").await.unwrap();
    let cached = store.get(&bucket, &k).await.unwrap().unwrap();
    assert_eq!(cached.response, response("<html>"));
    assert!(cached.cached_at <= Utc::now());
  }

  #[tokio::test]
  async fn test_keys_are_per_method() {
    let store = MemoryStore::new();
    let bucket = store.open_bucket("v1").await.unwrap();
    let get = RequestKey::new(&Method::GET, "https://shop.test/a");
    let head = RequestKey::new(&Method::HEAD, "https://shop.test/a");
    store.put(&bucket, &get, &response("a")).await.unwrap();

    assert!(store.get(&bucket, &head).await.unwrap().is_none());
    assert!(store.get(&bucket, &get).await.unwrap().is_some());
  }
}
