//! Durable queue of deferred writes.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::db::Database;
use crate::net::{Headers, Method};

/// Methods the outbox accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
  Post,
  Put,
  Delete,
}

impl WriteMethod {
  pub fn from_method(method: Method) -> Option<Self> {
    match method {
      Method::Post => Some(WriteMethod::Post),
      Method::Put => Some(WriteMethod::Put),
      Method::Delete => Some(WriteMethod::Delete),
      _ => None,
    }
  }

  pub fn as_method(&self) -> Method {
    match self {
      WriteMethod::Post => Method::Post,
      WriteMethod::Put => Method::Put,
      WriteMethod::Delete => Method::Delete,
    }
  }

  fn parse(s: &str) -> Option<Self> {
    Method::parse(s).and_then(Self::from_method)
  }
}

impl fmt::Display for WriteMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_method().as_str())
  }
}

/// Request payload reconstituted from its wire content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum QueueBody {
  Null,
  Json(serde_json::Value),
  Text(String),
  /// Anything that is not text, e.g. a multipart upload carrying a photo.
  /// Stored hex-encoded and sent back byte for byte.
  Bytes(#[serde(with = "hex")] Vec<u8>),
}

/// Everything needed to re-send a write, captured at queue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
  pub url: String,
  pub method: WriteMethod,
  pub headers: Headers,
  pub body: QueueBody,
  /// Creation time, milliseconds since epoch
  pub timestamp: i64,
}

/// A snapshot as stored, with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
  pub id: i64,
  #[serde(flatten)]
  pub request: RequestSnapshot,
}

/// SQLite-backed outbox.
///
/// Ids come from an AUTOINCREMENT key, so they only grow and are never
/// handed out twice, even after the newest entry is deleted.
#[derive(Clone)]
pub struct OutboxStore {
  db: Arc<Database>,
}

impl OutboxStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Append a snapshot and return its id.
  pub async fn insert(&self, request: RequestSnapshot) -> Result<i64> {
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let body = serde_json::to_string(&request.body)
      .map_err(|e| eyre!("Failed to serialize body: {}", e))?;

    self
      .db
      .transact(move |tx| {
        tx.execute(
          "INSERT INTO outbox (url, method, headers, body, timestamp) VALUES (?, ?, ?, ?, ?)",
          params![
            request.url,
            request.method.to_string(),
            headers,
            body,
            request.timestamp
          ],
        )
        .map_err(|e| eyre!("Failed to insert outbox entry: {}", e))?;
        Ok(tx.last_insert_rowid())
      })
      .await
  }

  /// All entries, oldest first.
  pub async fn list_all(&self) -> Result<Vec<QueueEntry>> {
    self
      .db
      .transact(|tx| {
        let mut stmt = tx
          .prepare("SELECT id, url, method, headers, body, timestamp FROM outbox ORDER BY id")
          .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, String>(2)?,
              row.get::<_, String>(3)?,
              row.get::<_, String>(4)?,
              row.get::<_, i64>(5)?,
            ))
          })
          .map_err(|e| eyre!("Failed to query outbox: {}", e))?;

        let mut entries = Vec::new();
        for row in rows {
          let (id, url, method, headers, body, timestamp) =
            row.map_err(|e| eyre!("Failed to read outbox row: {}", e))?;
          let method =
            WriteMethod::parse(&method).ok_or_else(|| eyre!("Unknown outbox method {}", method))?;
          let headers: Headers = serde_json::from_str(&headers)
            .map_err(|e| eyre!("Failed to decode headers of entry {}: {}", id, e))?;
          let body: QueueBody = serde_json::from_str(&body)
            .map_err(|e| eyre!("Failed to decode body of entry {}: {}", id, e))?;
          entries.push(QueueEntry {
            id,
            request: RequestSnapshot {
              url,
              method,
              headers,
              body,
              timestamp,
            },
          });
        }
        Ok(entries)
      })
      .await
  }

  /// Remove one entry. Deleting an id that is already gone is not an error.
  pub async fn delete_by_id(&self, id: i64) -> Result<()> {
    self
      .db
      .transact(move |tx| {
        tx.execute("DELETE FROM outbox WHERE id = ?", params![id])
          .map_err(|e| eyre!("Failed to delete outbox entry {}: {}", id, e))?;
        Ok(())
      })
      .await
  }

  /// Remove every entry.
  pub async fn clear(&self) -> Result<()> {
    self
      .db
      .transact(|tx| {
        tx.execute("DELETE FROM outbox", [])
          .map_err(|e| eyre!("Failed to clear outbox: {}", e))?;
        Ok(())
      })
      .await
  }

  pub async fn len(&self) -> Result<usize> {
    self
      .db
      .transact(|tx| {
        let count: i64 = tx
          .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
          .map_err(|e| eyre!("Failed to count outbox: {}", e))?;
        Ok(count as usize)
      })
      .await
  }
}
