//! The interception layer: one worker per process, with an explicit
//! install → activate lifecycle, routing every request the application
//! issues.

mod lifecycle;
mod registration;

pub use lifecycle::{ActivateReport, InstallReport, WorkerState};
pub use registration::{resume, Registration};

use chrono::Utc;
use color_eyre::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::Url;

use crate::cache::{classify, CacheNames, CacheStorage, CacheStrategy, Route};
use crate::config::Config;
use crate::db::Database;
use crate::net::{Request, Response, Transport, TransportError};
use crate::notify::{ClickTarget, Notification, NotificationBridge};
use crate::outbox::{OutboxCoordinator, OutboxStore, SyncReport};
use crate::platform::{Clients, NotificationSink, SyncRegistrar};

use lifecycle::Lifecycle;

/// Host facilities handed to the worker.
#[derive(Clone)]
pub struct Host {
  pub transport: Arc<dyn Transport>,
  pub registrar: Arc<dyn SyncRegistrar>,
  pub clients: Arc<dyn Clients>,
  pub notifications: Arc<dyn NotificationSink>,
}

/// Settings the worker needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub app_origin: Url,
  pub api_base: Url,
  pub base_path: String,
  pub names: CacheNames,
  pub shell_paths: Vec<String>,
  pub sync_tag: String,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let base_path = lifecycle::base_path(&config.app.script_path);
    Ok(Self {
      app_origin: config.app_origin()?,
      api_base: config.api_base()?,
      shell_paths: lifecycle::app_shell_paths(&base_path, &config.app.app_shell_files),
      base_path,
      names: config.cache_names(),
      sync_tag: config.sync.tag.clone(),
    })
  }
}

/// The offline-resilience worker.
pub struct ServiceWorker {
  settings: WorkerSettings,
  transport: Arc<dyn Transport>,
  clients: Arc<dyn Clients>,
  strategy: CacheStrategy,
  outbox: OutboxCoordinator,
  lifecycle: Lifecycle,
  notifications: NotificationBridge,
}

impl ServiceWorker {
  pub fn new(settings: WorkerSettings, db: Arc<Database>, host: Host) -> Self {
    let caches = CacheStorage::new(Arc::clone(&db));
    let store = OutboxStore::new(db);

    let strategy = CacheStrategy::new(
      Arc::clone(&host.transport),
      caches.clone(),
      settings.names.clone(),
      settings.app_origin.clone(),
      settings.base_path.clone(),
    );
    let outbox = OutboxCoordinator::new(
      Arc::clone(&host.transport),
      store,
      host.registrar,
      settings.sync_tag.clone(),
    );
    let lifecycle = Lifecycle::new(
      Arc::clone(&host.transport),
      caches,
      Arc::clone(&host.clients),
      settings.names.clone(),
      settings.app_origin.clone(),
      settings.shell_paths.clone(),
    );
    let notifications = NotificationBridge::new(
      host.notifications,
      Arc::clone(&host.clients),
      settings.app_origin.clone(),
      settings.base_path.clone(),
    );

    Self {
      settings,
      transport: host.transport,
      clients: host.clients,
      strategy,
      outbox,
      lifecycle,
      notifications,
    }
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn caches(&self) -> &CacheStorage {
    self.strategy.caches()
  }

  pub fn outbox_store(&self) -> &OutboxStore {
    self.outbox.store()
  }

  pub async fn install(&self) -> Result<InstallReport> {
    self.lifecycle.install().await
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    self.lifecycle.activate().await
  }

  pub fn route(&self, request: &Request) -> Route {
    classify(request, &self.settings.api_base)
  }

  /// Answer a request the application issued.
  ///
  /// Intercepted routes always produce a response; only requests the worker
  /// lets through can fail in transit.
  pub async fn handle_fetch(&self, request: Request) -> Result<Response, TransportError> {
    let route = self.route(&request);
    debug!(method = %request.method, url = %request.url, ?route, "fetch");

    let served = match route {
      Route::Passthrough | Route::Ignored => return self.transport.fetch(&request).await,
      Route::Outbox => return self.outbox.handle_write(request).await,
      Route::ApiRead => self.strategy.network_first_api(&request).await,
      Route::Navigation => self.strategy.network_first_navigation(&request).await,
      Route::StaticAsset => self.strategy.cache_first_static(&request).await,
    };
    debug!(url = %request.url, source = ?served.source, status = served.response.status, "served");
    Ok(served.response)
  }

  /// Background sync event. Returns `None` for tags this worker does not own.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.outbox.sync_tag() {
      debug!(tag, "ignoring unknown sync tag");
      return Ok(None);
    }
    info!(tag, "background sync triggered");
    self.sync_outbox().await.map(Some)
  }

  /// Replay the outbox now.
  pub async fn sync_outbox(&self) -> Result<SyncReport> {
    self.outbox.sync_outbox().await
  }

  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<Notification> {
    self.notifications.handle_push(payload).await
  }

  pub async fn handle_notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> Result<ClickTarget> {
    self.notifications.handle_click(notification, action).await
  }

  /// Client message. With a reply port the sender gets an answer directly;
  /// without one the message is echoed to every client.
  pub async fn handle_message(&self, data: Value, port: Option<oneshot::Sender<Value>>) -> Result<()> {
    debug!(%data, "message received");

    match port {
      Some(port) => {
        let result = if data.get("cmd").and_then(Value::as_str) == Some("PING") {
          json!({ "pong": Utc::now().timestamp_millis() })
        } else {
          json!({ "ok": true, "received": data })
        };
        // The sender may have stopped listening
        let _ = port.send(json!({ "ok": true, "result": result }));
      }
      None => {
        let delivered = self
          .clients
          .post_message_all(&json!({ "info": "Message received", "data": data }))
          .await?;
        debug!(delivered, "message broadcast");
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::mock::MockTransport;
  use crate::net::Method;
  use crate::platform::recording::Recorder;
  use crate::platform::BackgroundSync;

  const STORIES: &str = "https://story-api.dicoding.dev/v1/stories";

  pub(crate) struct Harness {
    pub transport: Arc<MockTransport>,
    pub registrar: Arc<BackgroundSync>,
    pub recorder: Arc<Recorder>,
    pub worker: ServiceWorker,
  }

  pub(crate) fn harness() -> Harness {
    let transport = Arc::new(MockTransport::new());
    let registrar = Arc::new(BackgroundSync::new());
    let recorder = Arc::new(Recorder::default());
    let settings = WorkerSettings::from_config(&Config::default()).unwrap();
    let worker = ServiceWorker::new(
      settings,
      Database::in_memory().unwrap(),
      Host {
        transport: transport.clone(),
        registrar: registrar.clone(),
        clients: recorder.clone(),
        notifications: recorder.clone(),
      },
    );
    Harness {
      transport,
      registrar,
      recorder,
      worker,
    }
  }

  fn story_post(description: &str) -> Request {
    Request::new(Method::Post, Url::parse(STORIES).unwrap())
      .with_header("authorization", "Bearer token")
      .with_json(&json!({ "description": description }))
      .unwrap()
  }

  #[tokio::test]
  async fn test_offline_story_submission_scenario() {
    let h = harness();
    h.transport.set_offline(true);

    let response = h.worker.handle_fetch(story_post("Sunset at the beach")).await.unwrap();
    assert_eq!(response.status, 202);
    let body = response.body_json().unwrap();
    assert_eq!(body["queued"], true);
    assert_eq!(body["id"], 1);

    let queued = h.worker.outbox_store().list_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert!(serde_json::to_string(&queued[0].request.body)
      .unwrap()
      .contains("Sunset at the beach"));

    h.transport.set_offline(false);
    h.transport.respond(Method::Post, STORIES, Response::new(201, r#"{"error":false}"#));
    let tags = h.registrar.take_pending();
    assert_eq!(tags, vec!["outbox-sync".to_string()]);

    let report = h.worker.handle_sync(&tags[0]).await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(h.worker.outbox_store().len().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_photo_upload_is_queued() {
    let h = harness();
    h.transport.set_offline(true);
    let mut body = b"--b\r\nContent-Disposition: form-data; name=\"photo\"\r\n\r\n".to_vec();
    body.extend_from_slice(&[0xff, 0xd8, 0xff, 0xe0]);
    body.extend_from_slice(b"\r\n--b--\r\n");
    let upload = Request::new(Method::Post, Url::parse(STORIES).unwrap())
      .with_header("authorization", "Bearer token")
      .with_header("content-type", "multipart/form-data; boundary=b")
      .with_body(body.clone());

    let response = h.worker.handle_fetch(upload).await.unwrap();
    assert_eq!(response.status, 202);
    assert_eq!(response.body_json().unwrap()["queued"], true);

    h.transport.set_offline(false);
    h.transport.respond(Method::Post, STORIES, Response::new(201, ""));
    let report = h.worker.sync_outbox().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(h.transport.calls().pop().unwrap().body, Some(body));
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_is_ignored() {
    let h = harness();
    assert!(h.worker.handle_sync("other-tag").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_passthrough_errors_propagate() {
    let h = harness();
    h.transport.set_offline(true);
    let request = Request::new(Method::Post, Url::parse("http://localhost:9000/form").unwrap());
    assert!(h.worker.handle_fetch(request).await.is_err());
  }

  #[tokio::test]
  async fn test_api_read_offline_is_synthesized() {
    let h = harness();
    h.transport.set_offline(true);
    let response = h
      .worker
      .handle_fetch(Request::get(Url::parse(STORIES).unwrap()))
      .await
      .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.body_json().unwrap()["offline"], true);
  }

  #[tokio::test]
  async fn test_install_then_activate_serves_shell_offline() {
    let h = harness();
    for path in ["index.html", "", "favicon.png", "images/logo.png", "manifest.json"] {
      h.transport.respond(
        Method::Get,
        &format!("http://localhost:9000/{}", path),
        Response::new(200, format!("<{}>", path)),
      );
    }
    h.worker.caches().open("story-app-v0").await.unwrap();

    let installed = h.worker.install().await.unwrap();
    assert_eq!(installed.cached, 5);
    let activated = h.worker.activate().await.unwrap();
    assert_eq!(activated.deleted, vec!["story-app-v0".to_string()]);
    assert_eq!(h.worker.state(), WorkerState::Activated);

    h.transport.set_offline(true);
    let page = h
      .worker
      .handle_fetch(Request::navigate(Url::parse("http://localhost:9000/#/map").unwrap()))
      .await
      .unwrap();
    assert_eq!(page.body_text(), "<index.html>");
  }

  #[tokio::test]
  async fn test_ping_message_gets_pong() {
    let h = harness();
    let (tx, rx) = oneshot::channel();
    h.worker
      .handle_message(json!({ "cmd": "PING" }), Some(tx))
      .await
      .unwrap();
    let reply = rx.await.unwrap();
    assert_eq!(reply["ok"], true);
    assert!(reply["result"]["pong"].is_i64());
  }

  #[tokio::test]
  async fn test_message_without_port_is_broadcast() {
    let h = harness();
    h.worker.handle_message(json!({ "hello": 1 }), None).await.unwrap();
    let messages = h.recorder.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["data"]["hello"], 1);
  }

  #[tokio::test]
  async fn test_other_messages_are_echoed() {
    let h = harness();
    let (tx, rx) = oneshot::channel();
    h.worker.handle_message(json!({ "cmd": "STATUS" }), Some(tx)).await.unwrap();
    let reply = rx.await.unwrap();
    assert_eq!(reply["result"]["received"]["cmd"], "STATUS");
  }
}
