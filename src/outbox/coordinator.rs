//! Deferred delivery of mutating API requests.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::store::{OutboxStore, QueueBody, QueueEntry, RequestSnapshot, WriteMethod};
use crate::net::{Request, Response, Transport, TransportError};
use crate::platform::SyncRegistrar;

/// Header dropped from snapshots; the transport recomputes it on replay.
const LENGTH_HEADER: &str = "content-length";

const QUEUED_MESSAGE: &str = "Request will be synced when back online";
const QUEUE_FAILED_MESSAGE: &str = "Failed to queue request";

/// Why a replayed entry stays in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
  /// Server answered outside 2xx/4xx
  Server(u16),
  /// No response at all
  Transport(TransportError),
}

impl fmt::Display for RetryCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RetryCause::Server(status) => write!(f, "server error {}", status),
      RetryCause::Transport(e) => write!(f, "{}", e),
    }
  }
}

/// Result of re-sending one queued entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
  /// 2xx: remove from the queue
  Delivered(u16),
  /// 4xx or an entry that can never be sent: remove from the queue
  Rejected(String),
  /// 5xx or transport failure: keep it and stop
  Retry(RetryCause),
}

impl ReplayOutcome {
  pub fn classify(result: Result<Response, TransportError>) -> Self {
    match result {
      Ok(response) if response.is_ok() => ReplayOutcome::Delivered(response.status),
      Ok(response) if response.is_client_error() => {
        ReplayOutcome::Rejected(format!("client error {}", response.status))
      }
      Ok(response) => ReplayOutcome::Retry(RetryCause::Server(response.status)),
      Err(e) if !e.is_network() => ReplayOutcome::Rejected(e.to_string()),
      Err(e) => ReplayOutcome::Retry(RetryCause::Transport(e)),
    }
  }

  /// Whether the entry is finished with, one way or the other.
  pub fn is_settled(&self) -> bool {
    !matches!(self, ReplayOutcome::Retry(_))
  }
}

/// The entry a sync run stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
  pub entry_id: i64,
  pub cause: RetryCause,
}

/// Summary of one `sync_outbox` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub delivered: usize,
  pub rejected: usize,
  /// Entries still queued after the run
  pub remaining: usize,
  pub halted: Option<Halt>,
}

impl SyncReport {
  pub fn is_complete(&self) -> bool {
    self.halted.is_none()
  }
}

/// Capture a request into a storable snapshot.
///
/// JSON bodies are decoded, other UTF-8 bodies kept as text and everything
/// else kept as raw bytes, so any write the application can send can be
/// queued. A body labelled JSON that does not parse is kept as sent.
pub fn capture(request: &Request) -> Result<RequestSnapshot> {
  let method = WriteMethod::from_method(request.method)
    .ok_or_else(|| eyre!("{} requests are not queued", request.method))?;

  let mut headers = request.headers.clone();
  headers.remove(LENGTH_HEADER);

  let is_json = headers
    .get("content-type")
    .map(|ct| ct.contains("application/json"))
    .unwrap_or(false);

  let body = match request.body.as_deref() {
    None | Some([]) => QueueBody::Null,
    Some(bytes) => match std::str::from_utf8(bytes) {
      Ok(text) if is_json => match serde_json::from_str(text) {
        Ok(value) => QueueBody::Json(value),
        Err(e) => {
          debug!(error = %e, "body labelled JSON does not parse, keeping it as text");
          QueueBody::Text(text.to_string())
        }
      },
      Ok(text) => QueueBody::Text(text.to_string()),
      Err(_) => QueueBody::Bytes(bytes.to_vec()),
    },
  };

  Ok(RequestSnapshot {
    url: request.url.to_string(),
    method,
    headers,
    body,
    timestamp: Utc::now().timestamp_millis(),
  })
}

/// Rebuild a sendable request from a stored snapshot.
pub fn rebuild(snapshot: &RequestSnapshot) -> Result<Request> {
  let url = Url::parse(&snapshot.url).map_err(|e| eyre!("Invalid queued URL {}: {}", snapshot.url, e))?;
  let mut request = Request::new(snapshot.method.as_method(), url);
  request.headers = snapshot.headers.clone();

  match &snapshot.body {
    QueueBody::Null => {}
    QueueBody::Json(value) => {
      let body = serde_json::to_vec(value).map_err(|e| eyre!("Failed to encode body: {}", e))?;
      if !request.headers.contains("content-type") {
        request.headers.insert("content-type", "application/json");
      }
      request.body = Some(body);
    }
    QueueBody::Text(text) => request.body = Some(text.clone().into_bytes()),
    QueueBody::Bytes(bytes) => request.body = Some(bytes.clone()),
  }

  Ok(request)
}

/// Re-send one entry and classify the result.
pub async fn replay(transport: &dyn Transport, entry: &QueueEntry) -> ReplayOutcome {
  let request = match rebuild(&entry.request) {
    Ok(request) => request,
    Err(e) => return ReplayOutcome::Rejected(e.to_string()),
  };
  ReplayOutcome::classify(transport.fetch(&request).await)
}

/// Sends writes immediately and parks them in the outbox when the network is
/// unreachable.
#[derive(Clone)]
pub struct OutboxCoordinator {
  transport: Arc<dyn Transport>,
  store: OutboxStore,
  registrar: Arc<dyn SyncRegistrar>,
  sync_tag: String,
}

impl OutboxCoordinator {
  pub fn new(
    transport: Arc<dyn Transport>,
    store: OutboxStore,
    registrar: Arc<dyn SyncRegistrar>,
    sync_tag: impl Into<String>,
  ) -> Self {
    Self {
      transport,
      store,
      registrar,
      sync_tag: sync_tag.into(),
    }
  }

  pub fn store(&self) -> &OutboxStore {
    &self.store
  }

  pub fn sync_tag(&self) -> &str {
    &self.sync_tag
  }

  /// Deliver a write, or queue it if the network cannot be reached.
  ///
  /// Server answers of any status are returned verbatim; only network
  /// failures queue. A request that could not be built is handed back as an
  /// error and never queued.
  pub async fn handle_write(&self, request: Request) -> Result<Response, TransportError> {
    let error = match self.transport.fetch(&request).await {
      Ok(response) => return Ok(response),
      Err(e) if !e.is_network() => return Err(e),
      Err(e) => e,
    };
    debug!(url = %request.url, error = %error, "write failed in transit, queueing");

    match self.enqueue(&request).await {
      Ok(id) => {
        info!(id, url = %request.url, "request queued in outbox");
        self.request_background_sync().await;
        Ok(Response::json(
          202,
          &json!({ "queued": true, "id": id, "message": QUEUED_MESSAGE }),
        ))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "failed to queue request");
        Ok(Response::json(500, &json!({ "error": QUEUE_FAILED_MESSAGE })))
      }
    }
  }

  async fn enqueue(&self, request: &Request) -> Result<i64> {
    let snapshot = capture(request)?;
    self.store.insert(snapshot).await
  }

  async fn request_background_sync(&self) {
    match self.registrar.register(&self.sync_tag).await {
      Ok(()) => debug!(tag = %self.sync_tag, "background sync registered"),
      Err(e) => warn!(tag = %self.sync_tag, error = %e, "background sync registration failed"),
    }
  }

  /// Replay the outbox oldest-first.
  ///
  /// Stops at the first entry that must be retried, leaving it and every
  /// later entry in place so ordering is never violated.
  pub async fn sync_outbox(&self) -> Result<SyncReport> {
    let entries = self.store.list_all().await?;
    if entries.is_empty() {
      info!("outbox empty, nothing to sync");
      return Ok(SyncReport::default());
    }

    info!(count = entries.len(), "syncing outbox");
    let total = entries.len();
    let mut report = SyncReport::default();

    for entry in &entries {
      match replay(self.transport.as_ref(), entry).await {
        ReplayOutcome::Delivered(status) => {
          self.store.delete_by_id(entry.id).await?;
          report.delivered += 1;
          info!(id = entry.id, status, "synced and removed outbox entry");
        }
        ReplayOutcome::Rejected(reason) => {
          self.store.delete_by_id(entry.id).await?;
          report.rejected += 1;
          warn!(id = entry.id, reason = %reason, "dropped outbox entry rejected by server");
        }
        ReplayOutcome::Retry(cause) => {
          warn!(id = entry.id, cause = %cause, "outbox sync halted, will retry later");
          report.halted = Some(Halt {
            entry_id: entry.id,
            cause,
          });
          break;
        }
      }
    }

    report.remaining = total - report.delivered - report.rejected;
    Ok(report)
  }
}
