//! Host facilities the worker relies on: background sync registration, the
//! set of controlled clients, and notification display.

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::info;

use crate::notify::Notification;

/// Deferred-task registration that fires once connectivity returns.
pub trait SyncRegistrar: Send + Sync {
  fn register<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Pages controlled by the worker.
pub trait Clients: Send + Sync {
  /// Take control of every open page.
  fn claim(&self) -> BoxFuture<'_, Result<()>>;

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;

  /// Post a message to every client; returns how many received it.
  fn post_message_all<'a>(&'a self, message: &'a serde_json::Value) -> BoxFuture<'a, Result<usize>>;
}

/// User-visible notification display.
pub trait NotificationSink: Send + Sync {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;

  fn close<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// In-process background sync: remembers which tags are waiting to fire.
#[derive(Debug, Default)]
pub struct BackgroundSync {
  pending: Mutex<BTreeSet<String>>,
}

impl BackgroundSync {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pending(&self) -> Vec<String> {
    self
      .pending
      .lock()
      .map(|p| p.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Remove and return every pending tag.
  pub fn take_pending(&self) -> Vec<String> {
    self
      .pending
      .lock()
      .map(|mut p| std::mem::take(&mut *p).into_iter().collect())
      .unwrap_or_default()
  }
}

impl SyncRegistrar for BackgroundSync {
  fn register<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<()>> {
    async move {
      self
        .pending
        .lock()
        .map_err(|e| color_eyre::eyre::eyre!("Lock poisoned: {}", e))?
        .insert(tag.to_string());
      Ok(())
    }
    .boxed()
  }
}

/// Clients and notifications for the command line: everything is reported on
/// stdout and in the log.
#[derive(Debug, Default)]
pub struct Console;

impl Clients for Console {
  fn claim(&self) -> BoxFuture<'_, Result<()>> {
    async move {
      info!("claimed clients");
      Ok(())
    }
    .boxed()
  }

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
    async move {
      info!(url, "opening window");
      println!("open {}", url);
      Ok(())
    }
    .boxed()
  }

  fn post_message_all<'a>(&'a self, message: &'a serde_json::Value) -> BoxFuture<'a, Result<usize>> {
    async move {
      println!("{}", message);
      Ok(1)
    }
    .boxed()
  }
}

impl NotificationSink for Console {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    async move {
      let rendered = serde_json::to_string_pretty(notification)?;
      println!("{}", rendered);
      Ok(())
    }
    .boxed()
  }

  fn close<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<()>> {
    async move {
      info!(tag, "notification closed");
      Ok(())
    }
    .boxed()
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_register_deduplicates_tags() {
    let sync = BackgroundSync::new();
    sync.register("outbox-sync").await.unwrap();
    sync.register("outbox-sync").await.unwrap();
    assert_eq!(sync.pending(), vec!["outbox-sync".to_string()]);

    assert_eq!(sync.take_pending(), vec!["outbox-sync".to_string()]);
    assert!(sync.pending().is_empty());
  }
}
