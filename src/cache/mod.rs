//! Response caching for intercepted reads.
//!
//! This module provides:
//! - Named, SQLite-backed response caches (app shell + runtime generations)
//! - Request classification (API read, navigation, static asset, ...)
//! - Network-first and cache-first fetch policies with offline fallbacks

mod storage;
mod strategy;

pub use storage::CacheStorage;
pub use strategy::{classify, CacheStrategy, Route};

/// Names of the current cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  /// Versioned by build; replaced wholesale on upgrade
  pub app_shell: String,
  /// Unversioned; grows as responses are seen
  pub runtime: String,
}

impl CacheNames {
  pub fn new(app_shell: impl Into<String>, runtime: impl Into<String>) -> Self {
    Self {
      app_shell: app_shell.into(),
      runtime: runtime.into(),
    }
  }

  /// Whether `name` belongs to this generation.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.app_shell || name == self.runtime
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Stored copy from one of the response caches
  Cache,
  /// Produced locally because neither network nor cache could answer
  Synthetic,
}
