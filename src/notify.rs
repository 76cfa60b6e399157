//! Push payloads to notifications, and notification clicks back to app URLs.

use chrono::Utc;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::platform::{Clients, NotificationSink};

const DEFAULT_TITLE: &str = "Story App";
const DEFAULT_BODY: &str = "You have a new notification";
const DEFAULT_TAG: &str = "story-notification";
const DEFAULT_VIBRATE: [u32; 3] = [200, 100, 200];
const LOGO_PATH: &str = "/images/logo.png";

pub const ACTION_VIEW: &str = "view";
pub const ACTION_CLOSE: &str = "close";

/// Fields a push sender may nest under `notification`.
#[derive(Debug, Default, Deserialize)]
struct NestedFields {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  image: Option<String>,
}

/// Push payload as sent by the server. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
  title: Option<String>,
  body: Option<String>,
  message: Option<String>,
  icon: Option<String>,
  image: Option<String>,
  badge: Option<String>,
  tag: Option<String>,
  data: Option<Value>,
  require_interaction: Option<bool>,
  vibrate: Option<Vec<u32>>,
  timestamp: Option<i64>,
  notification: Option<NestedFields>,
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// A fully resolved notification, ready to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  pub tag: String,
  pub data: Value,
  pub require_interaction: bool,
  pub vibrate: Vec<u32>,
  pub timestamp: i64,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Story the notification refers to, if any.
  pub fn story_id(&self) -> Option<String> {
    story_id(&self.data)
  }
}

/// Where a click leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
  Dismiss,
  Open(String),
}

/// `storyId` from notification data, accepting strings and numbers.
fn story_id(data: &Value) -> Option<String> {
  match data.get("storyId")? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// First non-empty candidate.
fn first_of<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
  candidates
    .into_iter()
    .flatten()
    .find(|s| !s.is_empty())
    .map(str::to_string)
}

/// Resolve a push payload into a notification.
///
/// Absent payloads get defaults; payloads that are not a JSON object of the
/// expected shape are shown as plain text.
pub fn build_notification(payload: Option<&[u8]>, base_path: &str) -> Notification {
  let logo = format!("{}{}", base_path, LOGO_PATH);

  let (message, whole) = match payload {
    None => (PushMessage::default(), None),
    Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
      Ok(value @ Value::Object(_)) => match serde_json::from_value::<PushMessage>(value.clone()) {
        Ok(message) => (message, Some(value)),
        Err(e) => {
          warn!(error = %e, "push payload has unexpected shape, showing as text");
          (text_message(bytes), None)
        }
      },
      _ => (text_message(bytes), None),
    },
  };

  let nested = message.notification.unwrap_or_default();
  let data = message.data.or(whole).unwrap_or_else(|| Value::Object(Default::default()));

  let actions = if story_id(&data).is_some() {
    vec![
      NotificationAction {
        action: ACTION_VIEW.to_string(),
        title: "View detail".to_string(),
        icon: Some(logo.clone()),
      },
      NotificationAction {
        action: ACTION_CLOSE.to_string(),
        title: "Dismiss".to_string(),
        icon: None,
      },
    ]
  } else {
    Vec::new()
  };

  Notification {
    title: first_of([message.title.as_deref(), nested.title.as_deref()])
      .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
    body: first_of([
      message.body.as_deref(),
      nested.body.as_deref(),
      message.message.as_deref(),
    ])
    .unwrap_or_else(|| DEFAULT_BODY.to_string()),
    icon: first_of([message.icon.as_deref(), nested.icon.as_deref()]).unwrap_or_else(|| logo.clone()),
    badge: first_of([message.badge.as_deref()]).unwrap_or_else(|| logo.clone()),
    image: first_of([message.image.as_deref(), nested.image.as_deref()]),
    tag: first_of([message.tag.as_deref()]).unwrap_or_else(|| DEFAULT_TAG.to_string()),
    data,
    require_interaction: message.require_interaction.unwrap_or(false),
    vibrate: message.vibrate.unwrap_or_else(|| DEFAULT_VIBRATE.to_vec()),
    timestamp: message
      .timestamp
      .unwrap_or_else(|| Utc::now().timestamp_millis()),
    actions,
  }
}

fn text_message(bytes: &[u8]) -> PushMessage {
  PushMessage {
    body: Some(String::from_utf8_lossy(bytes).into_owned()),
    ..Default::default()
  }
}

/// Decide where a click on a notification (or one of its buttons) leads.
pub fn resolve_click(action: Option<&str>, data: &Value, base_path: &str) -> ClickTarget {
  if action == Some(ACTION_CLOSE) {
    return ClickTarget::Dismiss;
  }

  let home = format!("{}/#/", base_path);
  if let Some(id) = story_id(data) {
    return ClickTarget::Open(format!("{}?storyId={}", home, id));
  }
  if let Some(url) = data.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) {
    return ClickTarget::Open(url.to_string());
  }
  ClickTarget::Open(home)
}

/// Shows push notifications and routes clicks into the application.
#[derive(Clone)]
pub struct NotificationBridge {
  sink: Arc<dyn NotificationSink>,
  clients: Arc<dyn Clients>,
  app_origin: Url,
  base_path: String,
}

impl NotificationBridge {
  pub fn new(
    sink: Arc<dyn NotificationSink>,
    clients: Arc<dyn Clients>,
    app_origin: Url,
    base_path: impl Into<String>,
  ) -> Self {
    Self {
      sink,
      clients,
      app_origin,
      base_path: base_path.into(),
    }
  }

  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<Notification> {
    info!("push notification received");
    let notification = build_notification(payload, &self.base_path);
    self.sink.show(&notification).await?;
    Ok(notification)
  }

  pub async fn handle_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> Result<ClickTarget> {
    info!(action = action.unwrap_or(""), "notification clicked");
    self.sink.close(&notification.tag).await?;

    let target = resolve_click(action, &notification.data, &self.base_path);
    if let ClickTarget::Open(path) = &target {
      let url = self
        .app_origin
        .join(path)
        .map(String::from)
        .unwrap_or_else(|_| path.clone());
      self.clients.open_window(&url).await?;
    }
    Ok(target)
  }
}
