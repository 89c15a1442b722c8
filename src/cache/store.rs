//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;

/// A captured response, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  /// Original request URL, kept for inspection and logging
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

/// A store entry together with its capture timestamp.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: StoredResponse,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache store backends.
///
/// Entries live in named stores; each operation is individually atomic and
/// no transaction spans multiple operations.
pub trait CacheStore: Send + Sync {
  /// Insert or overwrite a single entry.
  fn put(&self, store_name: &str, key: &str, response: &StoredResponse) -> Result<()>;

  /// Insert a batch of entries, all or nothing.
  fn put_all(&self, store_name: &str, entries: &[(String, StoredResponse)]) -> Result<()>;

  /// Look up an entry by key.
  fn get(&self, store_name: &str, key: &str) -> Result<Option<CachedEntry>>;

  /// Enumerate the names of all existing stores.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete every entry under a store name.
  fn delete_store(&self, store_name: &str) -> Result<()>;
}

/// SQLite-based cache store implementation.
///
/// Named stores are realized as a `store_name` column in one database, so
/// deleting a stale generation is a single atomic statement.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Create a new SQLite store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Create an in-memory store (used in tests).
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  /// Run database migrations for the cache table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
-- Request→response cache, grouped into named stores
CREATE TABLE IF NOT EXISTS response_cache (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_store ON response_cache(store_name);
"#;

impl CacheStore for SqliteStore {
  fn put(&self, store_name: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (store_name, request_key, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![store_name, key, response.url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn put_all(&self, store_name: &str, entries: &[(String, StoredResponse)]) -> Result<()> {
    // Headers are serialized before the transaction opens; an early return
    // inside it would leave BEGIN dangling on the shared connection
    let mut rows = Vec::with_capacity(entries.len());
    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
      rows.push((key, response, headers));
    }

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response, headers) in rows {
      let inserted = conn.execute(
        "INSERT OR REPLACE INTO response_cache (store_name, request_key, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![store_name, key, response.url, response.status, headers, response.body],
      );

      if let Err(e) = inserted {
        conn
          .execute("ROLLBACK", [])
          .map_err(|rb| eyre!("Failed to roll back transaction: {}", rb))?;
        return Err(eyre!("Failed to store response for {}: {}", response.url, e));
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, store_name: &str, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM response_cache
         WHERE store_name = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = stmt
      .query_row(params![store_name, key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .ok();

    match row {
      Some((url, status, headers_json, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;

        Ok(Some(CachedEntry {
          response: StoredResponse {
            url,
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT store_name FROM response_cache ORDER BY store_name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to enumerate stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_store(&self, store_name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE store_name = ?",
        params![store_name],
      )
      .map_err(|e| eyre!("Failed to delete store {}: {}", store_name, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(url: &str, body: &[u8]) -> StoredResponse {
    StoredResponse {
      url: url.to_string(),
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.to_vec(),
    }
  }

  #[test]
  fn put_then_get_roundtrip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let resp = response("https://example.com/index.html", b"<html></html>");

    store.put("app-shell-v1", "key1", &resp).unwrap();

    let entry = store.get("app-shell-v1", "key1").unwrap().unwrap();
    assert_eq!(entry.response, resp);
  }

  #[test]
  fn put_overwrites_existing_entry() {
    let store = SqliteStore::open_in_memory().unwrap();

    store
      .put("app-shell-v1", "key1", &response("https://example.com/", b"old"))
      .unwrap();
    store
      .put("app-shell-v1", "key1", &response("https://example.com/", b"new"))
      .unwrap();

    let entry = store.get("app-shell-v1", "key1").unwrap().unwrap();
    assert_eq!(entry.response.body, b"new");
  }

  #[test]
  fn get_missing_entry_returns_none() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.get("app-shell-v1", "nope").unwrap().is_none());
  }

  #[test]
  fn entries_are_scoped_to_their_store() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .put("app-shell-v1", "key1", &response("https://example.com/", b"v1"))
      .unwrap();

    assert!(store.get("app-shell-v2", "key1").unwrap().is_none());
  }

  #[test]
  fn put_all_commits_every_entry() {
    let store = SqliteStore::open_in_memory().unwrap();
    let entries = vec![
      ("a".to_string(), response("https://example.com/", b"root")),
      ("b".to_string(), response("https://example.com/styles.css", b"css")),
    ];

    store.put_all("app-shell-v1", &entries).unwrap();

    assert!(store.get("app-shell-v1", "a").unwrap().is_some());
    assert!(store.get("app-shell-v1", "b").unwrap().is_some());
  }

  #[test]
  fn put_all_leaves_connection_usable_for_later_writes() {
    let store = SqliteStore::open_in_memory().unwrap();
    let first = vec![("a".to_string(), response("https://example.com/", b"one"))];
    let second = vec![(
      "b".to_string(),
      response("https://example.com/styles.css", b"two"),
    )];

    store.put_all("app-shell-v1", &first).unwrap();
    store.put_all("app-shell-v1", &second).unwrap();
    store
      .put("app-shell-v1", "c", &response("https://example.com/c", b"three"))
      .unwrap();

    assert!(store.get("app-shell-v1", "a").unwrap().is_some());
    assert!(store.get("app-shell-v1", "b").unwrap().is_some());
    assert!(store.get("app-shell-v1", "c").unwrap().is_some());
  }

  #[test]
  fn store_names_lists_distinct_stores() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .put("app-shell-v1", "a", &response("https://example.com/", b"x"))
      .unwrap();
    store
      .put("app-shell-v1", "b", &response("https://example.com/b", b"y"))
      .unwrap();
    store
      .put("app-shell-v2", "a", &response("https://example.com/", b"z"))
      .unwrap();

    let names = store.store_names().unwrap();
    assert_eq!(names, vec!["app-shell-v1", "app-shell-v2"]);
  }

  #[test]
  fn delete_store_removes_only_named_store() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .put("app-shell-v1", "a", &response("https://example.com/", b"old"))
      .unwrap();
    store
      .put("app-shell-v2", "a", &response("https://example.com/", b"new"))
      .unwrap();

    store.delete_store("app-shell-v1").unwrap();

    assert!(store.get("app-shell-v1", "a").unwrap().is_none());
    assert!(store.get("app-shell-v2", "a").unwrap().is_some());
    assert_eq!(store.store_names().unwrap(), vec!["app-shell-v2"]);
  }
}
