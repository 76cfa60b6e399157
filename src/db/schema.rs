//! Versioned schema for the store.
//!
//! Migrations run in order, each in its own transaction together with the
//! `user_version` bump, so an interrupted upgrade resumes where it stopped.

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;

pub const PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

const MIGRATIONS: &[&str] = &[
  // 1: outbox
  r#"
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
"#,
  // 2: timestamp index, matching the page-side store layout
  r#"
CREATE INDEX IF NOT EXISTS idx_outbox_timestamp ON outbox(timestamp);
"#,
  // 3: named response caches
  r#"
CREATE TABLE IF NOT EXISTS caches (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url_hash),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(url_hash);
"#,
];

pub const CURRENT_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the schema up to [`CURRENT_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<()> {
  let version: i64 = conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

  if version > CURRENT_VERSION {
    return Err(eyre!(
      "Database schema version {} is newer than supported version {}",
      version,
      CURRENT_VERSION
    ));
  }

  for (index, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
    let next = index as i64 + 1;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin migration: {}", e))?;
    tx.execute_batch(sql)
      .map_err(|e| eyre!("Failed to run migration {}: {}", next, e))?;
    tx.execute_batch(&format!("PRAGMA user_version = {}", next))
      .map_err(|e| eyre!("Failed to record schema version {}: {}", next, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit migration {}: {}", next, e))?;
    tracing::debug!(version = next, "applied schema migration");
  }

  Ok(())
}
