use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::CacheNames;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub caches: CachesConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Origin the application is served from
  pub origin: String,
  /// Location of the worker script; its directory is the deployment base path
  pub script_path: String,
  /// App shell files, relative to the base path
  pub app_shell_files: Vec<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:9000".to_string(),
      script_path: "/sw.js".to_string(),
      app_shell_files: [
        "/index.html",
        "/",
        "/favicon.png",
        "/images/logo.png",
        "/manifest.json",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://story-api.dicoding.dev/v1".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
  /// Build identifier; the app-shell cache is named after it
  pub build_id: String,
  pub runtime: String,
}

impl Default for CachesConfig {
  fn default() -> Self {
    Self {
      build_id: "v1".to_string(),
      runtime: "runtime-cache-v1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to the data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background sync tag that triggers an outbox replay
  pub tag: String,
  /// Upper bound on worker registration at startup
  pub registration_timeout_ms: u64,
  /// How often `watch` checks connectivity
  pub check_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "outbox-sync".to_string(),
      registration_timeout_ms: 7000,
      check_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive, overridden by RUST_LOG
  pub level: String,
  /// Write logs to this file (rotated daily) instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./story-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/story-offline/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("story-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("story-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.app_origin()?;
    self.api_base()?;
    if self.caches.build_id.is_empty() {
      return Err(eyre!("caches.build_id must not be empty"));
    }
    Ok(())
  }

  pub fn app_origin(&self) -> Result<Url> {
    Url::parse(&self.app.origin).map_err(|e| eyre!("Invalid app.origin {}: {}", self.app.origin, e))
  }

  pub fn api_base(&self) -> Result<Url> {
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.api.base_url, e))
  }

  /// Cache names of the generation this build installs.
  pub fn cache_names(&self) -> CacheNames {
    CacheNames::new(
      format!("story-app-{}", self.caches.build_id),
      self.caches.runtime.clone(),
    )
  }

  pub fn api_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn registration_timeout(&self) -> Duration {
    Duration::from_millis(self.sync.registration_timeout_ms)
  }

  pub fn check_interval(&self) -> Duration {
    Duration::from_secs(self.sync.check_interval_secs.max(1))
  }
}
