//! Install and activate: populating the app shell and retiring old cache
//! generations.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheNames, CacheStorage};
use crate::net::{Request, Transport};
use crate::platform::Clients;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
}

/// Deployment base path derived from the worker script location:
/// `/repo/sw.js` → `/repo`, `/sw.js` → `""`.
pub fn base_path(script_path: &str) -> String {
  let script_name = script_path.rsplit('/').next().unwrap_or_default();
  let segments: Vec<&str> = script_path
    .split('/')
    .filter(|s| !s.is_empty() && *s != script_name)
    .collect();

  if segments.is_empty() {
    String::new()
  } else {
    format!("/{}", segments.join("/"))
  }
}

/// App shell paths under `base`.
pub fn app_shell_paths(base: &str, files: &[String]) -> Vec<String> {
  files
    .iter()
    .map(|f| {
      if f.starts_with('/') {
        format!("{}{}", base, f)
      } else {
        format!("{}/{}", base, f)
      }
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  pub total: usize,
  pub failed: Vec<String>,
  /// Take over without waiting for existing pages to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
}

/// Cache generation transitions for the interception layer.
pub struct Lifecycle {
  transport: Arc<dyn Transport>,
  caches: CacheStorage,
  clients: Arc<dyn Clients>,
  names: CacheNames,
  app_origin: Url,
  shell_paths: Vec<String>,
  state: Mutex<WorkerState>,
}

impl Lifecycle {
  pub fn new(
    transport: Arc<dyn Transport>,
    caches: CacheStorage,
    clients: Arc<dyn Clients>,
    names: CacheNames,
    app_origin: Url,
    shell_paths: Vec<String>,
  ) -> Self {
    Self {
      transport,
      caches,
      clients,
      names,
      app_origin,
      shell_paths,
      state: Mutex::new(WorkerState::Parsed),
    }
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Parsed)
  }

  fn set_state(&self, state: WorkerState) -> Result<()> {
    *self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = state;
    Ok(())
  }

  /// Fetch and store every app shell file.
  ///
  /// Files are fetched concurrently and independently: one failing is logged
  /// and counted, never fatal.
  pub async fn install(&self) -> Result<InstallReport> {
    self.set_state(WorkerState::Installing)?;
    info!(cache = %self.names.app_shell, files = ?self.shell_paths, "installing app shell");
    self.caches.open(&self.names.app_shell).await?;

    let results = join_all(self.shell_paths.iter().map(|path| self.cache_shell_file(path))).await;

    let mut failed = Vec::new();
    for (path, result) in self.shell_paths.iter().zip(results) {
      match result {
        Ok(()) => info!(path = %path, "cached"),
        Err(e) => {
          warn!(path = %path, error = %e, "failed to cache app shell file");
          failed.push(path.clone());
        }
      }
    }

    let total = self.shell_paths.len();
    let report = InstallReport {
      cached: total - failed.len(),
      total,
      failed,
      skip_waiting: true,
    };
    info!(cached = report.cached, total, "app shell cached");

    self.set_state(WorkerState::Installed)?;
    Ok(report)
  }

  async fn cache_shell_file(&self, path: &str) -> Result<()> {
    let url = self
      .app_origin
      .join(path)
      .map_err(|e| eyre!("Invalid app shell path {}: {}", path, e))?;
    let response = self.transport.fetch(&Request::get(url.clone())).await?;
    if !response.is_ok() {
      return Err(eyre!("HTTP {}", response.status));
    }
    self.caches.put(&self.names.app_shell, &url, &response).await
  }

  /// Delete stale cache generations, then take control of open pages.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.set_state(WorkerState::Activating)?;
    info!("activating");

    let deleted = match self.purge_stale_caches().await {
      Ok(deleted) => deleted,
      Err(e) => {
        warn!(error = %e, "cache cleanup failed");
        Vec::new()
      }
    };

    self.clients.claim().await?;
    self.set_state(WorkerState::Activated)?;
    info!(deleted = ?deleted, "activated and claimed clients");
    Ok(ActivateReport { deleted })
  }

  async fn purge_stale_caches(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.caches.keys().await? {
      if self.names.is_current(&name) {
        continue;
      }
      info!(cache = %name, "deleting old cache");
      if self.caches.delete(&name).await? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}
