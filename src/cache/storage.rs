//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::tag::CacheTag;
use crate::error::{ApiError, ApiResult};

/// A cached value together with the tags it provides.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  /// Human readable query description
  pub description: String,
  /// Last fetched (or optimistically patched) response body
  pub value: Value,
  /// Tags this entry provides
  pub tags: Vec<CacheTag>,
  /// When the value was fetched
  pub cached_at: DateTime<Utc>,
  /// Whether a mutation has invalidated the entry since it was fetched
  pub invalidated: bool,
}

/// Trait for cache storage backends.
///
/// Backends hold values only. Entry status and subscribers are kept by the
/// [`CacheStore`](super::CacheStore).
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under a query hash.
  fn load(&self, key: &str) -> ApiResult<Option<StoredEntry>>;

  /// Insert or replace the entry under a query hash.
  fn save(&self, key: &str, entry: &StoredEntry) -> ApiResult<()>;

  /// Remove one entry. Missing keys are not an error.
  fn remove(&self, key: &str) -> ApiResult<()>;

  /// Every stored entry, used to rebuild entry metadata on startup.
  fn load_all(&self) -> ApiResult<Vec<(String, StoredEntry)>>;

  /// Drop everything.
  fn clear(&self) -> ApiResult<()>;
}

/// Process-local storage; the default backend.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, StoredEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl CacheStorage for MemoryStorage {
  fn load(&self, key: &str) -> ApiResult<Option<StoredEntry>> {
    Ok(self.entries().get(key).cloned())
  }

  fn save(&self, key: &str, entry: &StoredEntry) -> ApiResult<()> {
    self.entries().insert(key.to_string(), entry.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> ApiResult<()> {
    self.entries().remove(key);
    Ok(())
  }

  fn load_all(&self) -> ApiResult<Vec<(String, StoredEntry)>> {
    Ok(
      self
        .entries()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  fn clear(&self) -> ApiResult<()> {
    self.entries().clear();
    Ok(())
  }
}

/// SQLite-based cache storage, persisted across process runs.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at the default location.
  pub fn open_default() -> ApiResult<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> ApiResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| ApiError::Cache(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ApiError::Cache(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// `<data_dir>/crudcache/cache.db`
  pub fn default_path() -> ApiResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ApiError::Cache("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("crudcache").join("cache.db"))
  }

  fn conn(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn run_migrations(&self) -> ApiResult<()> {
    self
      .conn()
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| ApiError::Cache(format!("Failed to run cache migrations: {}", e)))
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    query_hash TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    data BLOB NOT NULL,
    tags TEXT NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0,
    cached_at TEXT NOT NULL
);
"#;

type EntryRow = (String, Vec<u8>, String, bool, String);

fn decode_row((description, data, tags, invalidated, cached_at): EntryRow) -> ApiResult<StoredEntry> {
  let value = serde_json::from_slice(&data)
    .map_err(|e| ApiError::Cache(format!("Failed to deserialize cached value: {}", e)))?;
  let tags = serde_json::from_str(&tags)
    .map_err(|e| ApiError::Cache(format!("Failed to deserialize cache tags: {}", e)))?;
  let cached_at = DateTime::parse_from_rfc3339(&cached_at)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| ApiError::Cache(format!("Failed to parse datetime '{}': {}", cached_at, e)))?;

  Ok(StoredEntry {
    description,
    value,
    tags,
    cached_at,
    invalidated,
  })
}

impl CacheStorage for SqliteStorage {
  fn load(&self, key: &str) -> ApiResult<Option<StoredEntry>> {
    let conn = self.conn();
    let mut stmt = conn.prepare(
      "SELECT description, data, tags, invalidated, cached_at FROM cache_entries
       WHERE query_hash = ?",
    )?;

    let mut rows = stmt.query_map(params![key], |row| {
      Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    })?;

    match rows.next() {
      Some(row) => Ok(Some(decode_row(row?)?)),
      None => Ok(None),
    }
  }

  fn save(&self, key: &str, entry: &StoredEntry) -> ApiResult<()> {
    let data = serde_json::to_vec(&entry.value)
      .map_err(|e| ApiError::Cache(format!("Failed to serialize cached value: {}", e)))?;
    let tags = serde_json::to_string(&entry.tags)
      .map_err(|e| ApiError::Cache(format!("Failed to serialize cache tags: {}", e)))?;

    self.conn().execute(
      "INSERT OR REPLACE INTO cache_entries (query_hash, description, data, tags, invalidated, cached_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        key,
        entry.description,
        data,
        tags,
        entry.invalidated,
        entry.cached_at.to_rfc3339()
      ],
    )?;

    Ok(())
  }

  fn remove(&self, key: &str) -> ApiResult<()> {
    self
      .conn()
      .execute("DELETE FROM cache_entries WHERE query_hash = ?", params![key])?;
    Ok(())
  }

  fn load_all(&self) -> ApiResult<Vec<(String, StoredEntry)>> {
    let conn = self.conn();
    let mut stmt = conn.prepare(
      "SELECT query_hash, description, data, tags, invalidated, cached_at FROM cache_entries",
    )?;

    let rows: Vec<(String, EntryRow)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          (row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
        ))
      })?
      .collect::<Result<_, _>>()?;

    rows
      .into_iter()
      .map(|(key, row)| Ok((key, decode_row(row)?)))
      .collect()
  }

  fn clear(&self) -> ApiResult<()> {
    self.conn().execute("DELETE FROM cache_entries", [])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entry(value: Value) -> StoredEntry {
    StoredEntry {
      description: "Invoice 1".to_string(),
      value,
      tags: vec![CacheTag::list("Invoice")],
      cached_at: Utc::now(),
      invalidated: false,
    }
  }

  #[test]
  fn test_memory_roundtrip_and_remove() {
    let storage = MemoryStorage::new();
    storage.save("k", &entry(json!({"id": "1"}))).unwrap();
    assert_eq!(storage.load("k").unwrap().unwrap().value, json!({"id": "1"}));

    storage.remove("k").unwrap();
    assert!(storage.load("k").unwrap().is_none());
  }

  #[test]
  fn test_sqlite_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    let original = entry(json!({"id": "1", "name": "Acme"}));
    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.save("k", &original).unwrap();
    }

    let reopened = SqliteStorage::open(&path).unwrap();
    let loaded = reopened.load("k").unwrap().unwrap();
    assert_eq!(loaded.value, original.value);
    assert_eq!(loaded.tags, original.tags);
    assert_eq!(loaded.cached_at.timestamp(), original.cached_at.timestamp());
    assert!(!loaded.invalidated);

    let all = reopened.load_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "k");
  }

  #[test]
  fn test_sqlite_replace_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open(&dir.path().join("cache.db")).unwrap();

    storage.save("k", &entry(json!([]))).unwrap();
    let mut replaced = entry(json!([{"id": "2"}]));
    replaced.invalidated = true;
    storage.save("k", &replaced).unwrap();

    let loaded = storage.load("k").unwrap().unwrap();
    assert_eq!(loaded.value, json!([{"id": "2"}]));
    assert!(loaded.invalidated);

    storage.clear().unwrap();
    assert!(storage.load_all().unwrap().is_empty());
  }
}
