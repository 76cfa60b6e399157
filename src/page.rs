//! What the application page may do with the outbox: read it, clear it, and
//! run its own replay when it notices the network is back.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::net::Transport;
use crate::outbox::{replay, OutboxStore, QueueEntry};

/// Result of a page-driven replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReplay {
  pub attempted: usize,
  pub confirmed: usize,
  /// Every entry of the snapshot was confirmed and removed
  pub drained: bool,
}

/// Page-side access to the outbox.
#[derive(Clone)]
pub struct PageBridge {
  store: OutboxStore,
  transport: Arc<dyn Transport>,
}

impl PageBridge {
  pub fn new(store: OutboxStore, transport: Arc<dyn Transport>) -> Self {
    Self { store, transport }
  }

  /// Snapshot of pending writes, oldest first.
  pub async fn list_queued_writes(&self) -> Result<Vec<QueueEntry>> {
    self.store.list_all().await
  }

  /// Drop every pending write.
  pub async fn clear_queued_writes(&self) -> Result<()> {
    self.store.clear().await
  }

  /// Replay the snapshot from the page, oldest first.
  ///
  /// Confirmed entries (delivered or permanently rejected) are deleted one by
  /// one; the replay stops at the first unconfirmed entry. Writes queued
  /// while the replay runs are not part of the snapshot and stay queued.
  ///
  /// The worker's own sync may be draining the same queue concurrently, so an
  /// empty or shrinking queue is expected, not an error.
  pub async fn replay_queued_writes(&self) -> Result<PageReplay> {
    let entries = self.list_queued_writes().await?;
    if entries.is_empty() {
      return Ok(PageReplay::default());
    }

    info!(count = entries.len(), "page replaying queued writes");
    let mut report = PageReplay::default();

    for entry in &entries {
      report.attempted += 1;
      let outcome = replay(self.transport.as_ref(), entry).await;
      if !outcome.is_settled() {
        warn!(id = entry.id, ?outcome, "queued write not confirmed, will retry later");
        break;
      }
      self.store.delete_by_id(entry.id).await?;
      report.confirmed += 1;
    }

    report.drained = report.confirmed == entries.len();
    if report.drained {
      info!(confirmed = report.confirmed, "page replay confirmed every queued write");
    }
    Ok(report)
  }
}
