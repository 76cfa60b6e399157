//! Request/response model shared by the interception layer and its transports.
//!
//! The layer never talks to the network directly: it goes through a
//! [`Transport`], which reports transport-level failures (no connection, DNS,
//! timeout) as [`TransportError`] and every HTTP status, including 4xx and
//! 5xx, as an ordinary [`Response`].

mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpTransport;

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Some(Method::Get),
      "HEAD" => Some(Method::Head),
      "POST" => Some(Method::Post),
      "PUT" => Some(Method::Put),
      "PATCH" => Some(Method::Patch),
      "DELETE" => Some(Method::Delete),
      "OPTIONS" => Some(Method::Options),
      _ => None,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Header map with lowercased names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: &str, value: impl Into<String>) {
    self.0.insert(name.to_ascii_lowercase(), value.into());
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.contains_key(&name.to_ascii_lowercase())
  }

  pub fn remove(&mut self, name: &str) -> Option<String> {
    self.0.remove(&name.to_ascii_lowercase())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut headers = Headers::new();
    for (k, v) in iter {
      headers.insert(k.as_ref(), v);
    }
    headers
  }
}

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  #[default]
  Cors,
}

/// An outbound request issued by the application.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      headers: Headers::new(),
      body: None,
      mode: RequestMode::default(),
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// JSON body with a matching content type.
  pub fn with_json<T: Serialize>(self, value: &T) -> serde_json::Result<Self> {
    let body = serde_json::to_vec(value)?;
    Ok(
      self
        .with_header("content-type", "application/json")
        .with_body(body),
    )
  }
}

/// Response type as the page would observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response with CORS headers
  Cors,
  /// Cross-origin response without CORS access
  Opaque,
  /// Produced locally by the interception layer
  Synthetic,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
      ResponseKind::Synthetic => "default",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "cors" => ResponseKind::Cors,
      "opaque" => ResponseKind::Opaque,
      "default" => ResponseKind::Synthetic,
      _ => ResponseKind::Basic,
    }
  }
}

/// A complete HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string(),
      headers: Headers::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
    }
  }

  /// Locally produced JSON response.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    let mut response = Self::new(status, value.to_string());
    response.headers.insert("content-type", "application/json");
    response.kind = ResponseKind::Synthetic;
    response
  }

  /// Locally produced plain-text response.
  pub fn text(status: u16, body: &str) -> Self {
    let mut response = Self::new(status, body);
    response.headers.insert("content-type", "text/plain; charset=utf-8");
    response.kind = ResponseKind::Synthetic;
    response
  }

  /// Locally produced HTML response.
  pub fn html(status: u16, body: &str) -> Self {
    let mut response = Self::new(status, body);
    response.headers.insert("content-type", "text/html; charset=utf-8");
    response.kind = ResponseKind::Synthetic;
    response
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_client_error(&self) -> bool {
    (400..500).contains(&self.status)
  }

  pub fn body_json(&self) -> serde_json::Result<serde_json::Value> {
    serde_json::from_slice(&self.body)
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// What went wrong below HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
  /// Connection refused, DNS failure, no route
  Connect,
  Timeout,
  /// Anything else that kept a response from arriving
  Other,
  /// The request could not be built (bad header, bad URL); it never left
  /// the process and sending it again would fail the same way
  Request,
}

/// A transport-level failure: no response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
  pub kind: TransportErrorKind,
  pub message: String,
}

impl TransportError {
  pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn offline() -> Self {
    Self::new(TransportErrorKind::Connect, "network unreachable")
  }

  /// Whether the network was at fault, as opposed to the request itself.
  pub fn is_network(&self) -> bool {
    !matches!(self.kind, TransportErrorKind::Request)
  }
}

impl fmt::Display for TransportError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      TransportErrorKind::Connect => write!(f, "connection failed: {}", self.message),
      TransportErrorKind::Timeout => write!(f, "request timed out: {}", self.message),
      TransportErrorKind::Other => write!(f, "transport error: {}", self.message),
      TransportErrorKind::Request => write!(f, "invalid request: {}", self.message),
    }
  }
}

impl std::error::Error for TransportError {}

/// Network access as seen by the interception layer.
pub trait Transport: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, TransportError>>;
}

/// Origin comparison helper (`scheme://host:port`).
pub fn same_origin(a: &Url, b: &Url) -> bool {
  a.origin() == b.origin()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_headers_are_case_insensitive() {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "application/json");
    assert_eq!(headers.get("content-type"), Some("application/json"));
    assert!(headers.contains("CONTENT-TYPE"));
    assert_eq!(headers.iter().next(), Some(("content-type", "application/json")));
  }

  #[test]
  fn test_method_parse() {
    assert_eq!(Method::parse("post"), Some(Method::Post));
    assert_eq!(Method::parse("DELETE"), Some(Method::Delete));
    assert_eq!(Method::parse("BREW"), None);
  }

  #[test]
  fn test_synthetic_json_response() {
    let response = Response::json(503, &serde_json::json!({ "offline": true }));
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.kind, ResponseKind::Synthetic);
    assert_eq!(response.headers.get("content-type"), Some("application/json"));
    assert_eq!(response.body_json().unwrap()["offline"], true);
  }

  #[test]
  fn test_status_classes() {
    assert!(Response::new(201, "").is_ok());
    assert!(!Response::new(302, "").is_ok());
    assert!(Response::new(404, "").is_client_error());
    assert!(!Response::new(500, "").is_client_error());
  }

  #[test]
  fn test_status_text_comes_from_status_code() {
    assert_eq!(Response::new(202, "").status_text, "Accepted");
    assert_eq!(Response::new(418, "").status_text, "I'm a teapot");
    assert_eq!(Response::new(599, "").status_text, "");
  }

  #[test]
  fn test_only_request_errors_are_not_network_failures() {
    assert!(TransportError::offline().is_network());
    assert!(TransportError::new(TransportErrorKind::Timeout, "slow").is_network());
    assert!(!TransportError::new(TransportErrorKind::Request, "bad header").is_network());
  }

  #[test]
  fn test_same_origin() {
    let a = Url::parse("https://story-api.dicoding.dev/v1/stories").unwrap();
    let b = Url::parse("https://story-api.dicoding.dev/v1/login").unwrap();
    let c = Url::parse("http://localhost:9000/").unwrap();
    assert!(same_origin(&a, &b));
    assert!(!same_origin(&a, &c));
  }
}
