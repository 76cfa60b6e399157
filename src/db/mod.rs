pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{Connection, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// Open databases keyed by path, so every opener in the process shares one
/// connection and one migration run.
static OPEN_DATABASES: OnceLock<Mutex<HashMap<PathBuf, Weak<Database>>>> = OnceLock::new();

/// Database connection wrapper shared by the response caches and the outbox.
pub struct Database {
  conn: Mutex<Connection>,
  path: Option<PathBuf>,
}

impl Database {
  /// Open or create the database at `path`, reusing the instance already open
  /// in this process if there is one.
  pub fn open_shared(path: &Path) -> Result<Arc<Self>> {
    let registry = OPEN_DATABASES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut open = registry
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key = normalize_path(path);
    if let Some(db) = open.get(&key).and_then(Weak::upgrade) {
      return Ok(db);
    }

    let db = Arc::new(Self::open(path)?);
    open.insert(key, Arc::downgrade(&db));
    Ok(db)
  }

  /// Open or create the database at `path` without sharing.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let db = Self {
      conn: Mutex::new(conn),
      path: Some(path.to_path_buf()),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Private in-memory database.
  #[cfg(test)]
  pub fn in_memory() -> Result<Arc<Self>> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    let db = Self {
      conn: Mutex::new(conn),
      path: None,
    };
    db.run_migrations()?;
    Ok(Arc::new(db))
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("story-offline").join("store.db"))
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(schema::PRAGMAS)
      .map_err(|e| eyre!("Failed to configure database: {}", e))?;
    schema::migrate(&mut conn)
  }

  /// Run `f` inside one transaction on a blocking thread.
  ///
  /// The transaction commits only when `f` returns `Ok`; any error, and any
  /// panic unwinding out of `f`, drops it and rolls back.
  pub async fn transact<T, F>(self: &Arc<Self>, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
  {
    let db = Arc::clone(self);
    tokio::task::spawn_blocking(move || db.transact_blocking(f))
      .await
      .map_err(|e| eyre!("Database task failed: {}", e))?
  }

  fn transact_blocking<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
  {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let value = f(&tx)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(value)
  }
}

fn normalize_path(path: &Path) -> PathBuf {
  std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_open_shared_converges_on_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let a = Database::open_shared(&path).unwrap();
    let b = Database::open_shared(&path).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[test]
  fn test_reopen_after_drop_runs_migrations_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    drop(Database::open(&path).unwrap());
    let db = Database::open(&path).unwrap();
    let conn = db.conn.lock().unwrap();
    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .unwrap();
    assert_eq!(version, schema::CURRENT_VERSION);
  }

  #[tokio::test]
  async fn test_failed_transaction_rolls_back() {
    let db = Database::in_memory().unwrap();

    let result: Result<()> = db
      .transact(|tx| {
        tx.execute(
          "INSERT INTO caches (name) VALUES (?)",
          rusqlite::params!["doomed"],
        )?;
        Err(eyre!("abort"))
      })
      .await;
    assert!(result.is_err());

    let count: i64 = db
      .transact(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM caches", [], |row| row.get(0))?))
      .await
      .unwrap();
    assert_eq!(count, 0);
  }
}
