//! Named response caches stored in SQLite.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use url::Url;

use crate::db::Database;
use crate::net::{Headers, Response, ResponseKind};

/// A response read back from a cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Cache key for a GET of `url`; fragments never take part in matching.
pub fn request_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(b"GET ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// Collection of named caches, enumerated in creation order.
#[derive(Clone)]
pub struct CacheStorage {
  db: Arc<Database>,
}

impl CacheStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Create the named cache if it does not exist yet.
  pub async fn open(&self, name: &str) -> Result<()> {
    let name = name.to_string();
    self.db.transact(move |tx| ensure_cache(tx, &name)).await
  }

  /// Store `response` under `url` in the named cache, replacing any previous
  /// entry for the same key.
  pub async fn put(&self, name: &str, url: &Url, response: &Response) -> Result<()> {
    let name = name.to_string();
    let key = request_key(url);
    let url = url.to_string();
    let response = response.clone();
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self
      .db
      .transact(move |tx| {
        ensure_cache(tx, &name)?;
        tx.execute(
          "INSERT OR REPLACE INTO cache_entries
             (cache_name, url_hash, url, status, status_text, headers, body, kind, cached_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
          params![
            name,
            key,
            url,
            response.status,
            response.status_text,
            headers,
            response.body,
            response.kind.as_str()
          ],
        )
        .map_err(|e| eyre!("Failed to store cached response: {}", e))?;
        Ok(())
      })
      .await
  }

  /// Look `url` up in one named cache.
  pub async fn match_in(&self, name: &str, url: &Url) -> Result<Option<CachedResponse>> {
    let name = name.to_string();
    let key = request_key(url);
    self
      .db
      .transact(move |tx| {
        load_entry(
          tx,
          "SELECT status, status_text, headers, body, kind, cached_at FROM cache_entries
           WHERE cache_name = ?1 AND url_hash = ?2",
          params![name, key],
        )
      })
      .await
  }

  /// Look `url` up across every cache, oldest cache first.
  pub async fn match_any(&self, url: &Url) -> Result<Option<CachedResponse>> {
    let key = request_key(url);
    self
      .db
      .transact(move |tx| {
        load_entry(
          tx,
          "SELECT ce.status, ce.status_text, ce.headers, ce.body, ce.kind, ce.cached_at
           FROM cache_entries ce
           INNER JOIN caches c ON c.name = ce.cache_name
           WHERE ce.url_hash = ?1
           ORDER BY c.seq
           LIMIT 1",
          params![key],
        )
      })
      .await
  }

  /// Names of all caches, in creation order.
  pub async fn keys(&self) -> Result<Vec<String>> {
    self
      .db
      .transact(|tx| {
        let mut stmt = tx
          .prepare("SELECT name FROM caches ORDER BY seq")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
        let names = stmt
          .query_map([], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list caches: {}", e))?
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read cache name: {}", e))?;
        Ok(names)
      })
      .await
  }

  pub async fn has(&self, name: &str) -> Result<bool> {
    Ok(self.keys().await?.iter().any(|k| k == name))
  }

  /// Delete a cache and everything in it. Returns whether it existed.
  pub async fn delete(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .db
      .transact(move |tx| {
        let removed = tx
          .execute("DELETE FROM caches WHERE name = ?", params![name])
          .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;
        Ok(removed > 0)
      })
      .await
  }

  /// URLs stored in the named cache.
  pub async fn urls(&self, name: &str) -> Result<Vec<String>> {
    let name = name.to_string();
    self
      .db
      .transact(move |tx| {
        let mut stmt = tx
          .prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
        let urls = stmt
          .query_map(params![name], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list cache entries: {}", e))?
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;
        Ok(urls)
      })
      .await
  }
}

fn ensure_cache(tx: &Transaction<'_>, name: &str) -> Result<()> {
  tx.execute(
    "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, datetime('now'))",
    params![name],
  )
  .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;
  Ok(())
}

fn load_entry(
  tx: &Transaction<'_>,
  sql: &str,
  params: impl rusqlite::Params,
) -> Result<Option<CachedResponse>> {
  type Row = (u16, String, String, Vec<u8>, String, String);

  let row: Option<Row> = tx
    .query_row(sql, params, |row| {
      Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
      ))
    })
    .optional()
    .map_err(|e| eyre!("Failed to query cache: {}", e))?;

  let Some((status, status_text, headers, body, kind, cached_at)) = row else {
    return Ok(None);
  };

  let headers: Headers =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to decode cached headers: {}", e))?;

  Ok(Some(CachedResponse {
    response: Response {
      status,
      status_text,
      headers,
      body,
      kind: ResponseKind::parse(&kind),
    },
    cached_at: parse_datetime(&cached_at)?,
  }))
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

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_request_key_ignores_fragment() {
    assert_eq!(
      request_key(&url("http://localhost/app.js#x")),
      request_key(&url("http://localhost/app.js"))
    );
    assert_ne!(
      request_key(&url("http://localhost/app.js?v=2")),
      request_key(&url("http://localhost/app.js"))
    );
  }

  #[tokio::test]
  async fn test_put_and_match() {
    let caches = CacheStorage::new(Database::in_memory().unwrap());
    let target = url("http://localhost:9000/app.js");
    let mut response = Response::new(200, "console.log(1)");
    response.headers.insert("Content-Type", "text/javascript");

    caches.put("runtime", &target, &response).await.unwrap();

    let hit = caches.match_in("runtime", &target).await.unwrap().unwrap();
    assert_eq!(hit.response, response);
    assert!(caches.match_in("other", &target).await.unwrap().is_none());
    assert!(caches.match_any(&url("http://localhost:9000/missing.js")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_match_any_prefers_older_cache() {
    let caches = CacheStorage::new(Database::in_memory().unwrap());
    let target = url("http://localhost:9000/");

    caches.open("shell").await.unwrap();
    caches.put("runtime", &target, &Response::new(200, "runtime")).await.unwrap();
    caches.put("shell", &target, &Response::new(200, "shell")).await.unwrap();

    let hit = caches.match_any(&target).await.unwrap().unwrap();
    assert_eq!(hit.response.body, b"shell".to_vec());
  }

  #[tokio::test]
  async fn test_delete_removes_cache_and_entries() {
    let caches = CacheStorage::new(Database::in_memory().unwrap());
    let target = url("http://localhost:9000/logo.png");
    caches.put("old", &target, &Response::new(200, "png")).await.unwrap();
    caches.open("new").await.unwrap();

    assert!(caches.delete("old").await.unwrap());
    assert!(!caches.delete("old").await.unwrap());
    assert_eq!(caches.keys().await.unwrap(), vec!["new".to_string()]);
    assert!(caches.match_any(&target).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_put_replaces_existing_entry() {
    let caches = CacheStorage::new(Database::in_memory().unwrap());
    let target = url("http://localhost:9000/style.css");
    caches.put("runtime", &target, &Response::new(200, "a")).await.unwrap();
    caches.put("runtime", &target, &Response::new(200, "b")).await.unwrap();

    assert_eq!(caches.urls("runtime").await.unwrap().len(), 1);
    let hit = caches.match_in("runtime", &target).await.unwrap().unwrap();
    assert_eq!(hit.response.body, b"b".to_vec());
  }
}
