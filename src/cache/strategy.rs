//! Read-request routing and the three fetch policies.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::storage::CacheStorage;
use super::{CacheNames, CacheSource};
use crate::net::{same_origin, Method, Request, RequestMode, Response, ResponseKind, Transport};

/// Dev-server endpoints that must reach the network untouched.
const DEV_PATHS: &[&str] = &[
  "/sockjs-node",
  "/ws",
  "/webpack-dev-server",
  "/__webpack",
  "/hot-update",
];

const OFFLINE_API_MESSAGE: &str = "Offline: data not available";
const OFFLINE_ASSET_MESSAGE: &str = "Resource not available";

const OFFLINE_PAGE: &str = "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\">\
<title>Offline</title></head><body><h1>The application is offline</h1>\
<p>Check your internet connection and reload the page.</p></body></html>";

/// Where an intercepted request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Non-GET request the layer does not handle
  Passthrough,
  /// Dev-server traffic, never intercepted
  Ignored,
  /// POST/PUT/DELETE to the API
  Outbox,
  ApiRead,
  Navigation,
  StaticAsset,
}

impl Route {
  pub fn is_intercepted(&self) -> bool {
    !matches!(self, Route::Passthrough | Route::Ignored)
  }
}

/// Classify a request; the first matching rule wins.
pub fn classify(request: &Request, api_base: &Url) -> Route {
  let url = &request.url;
  let is_api = same_origin(url, api_base);

  if request.method != Method::Get {
    return match request.method {
      Method::Post | Method::Put | Method::Delete if is_api => Route::Outbox,
      _ => Route::Passthrough,
    };
  }

  let is_local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
  if is_local && DEV_PATHS.iter().any(|p| url.path().contains(p)) {
    return Route::Ignored;
  }

  if is_api {
    return Route::ApiRead;
  }

  let wants_html = request
    .headers
    .get("accept")
    .map(|accept| accept.contains("text/html"))
    .unwrap_or(false);
  if request.mode == RequestMode::Navigate || wants_html {
    return Route::Navigation;
  }

  Route::StaticAsset
}

/// A response together with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: CacheSource,
}

impl Served {
  fn network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
    }
  }

  fn cache(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Cache,
    }
  }

  fn synthetic(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Synthetic,
    }
  }
}

/// Serves read requests from the network, the response caches, or both.
#[derive(Clone)]
pub struct CacheStrategy {
  transport: Arc<dyn Transport>,
  caches: CacheStorage,
  names: CacheNames,
  /// Origin the application is served from
  app_origin: Url,
  base_path: String,
}

impl CacheStrategy {
  pub fn new(
    transport: Arc<dyn Transport>,
    caches: CacheStorage,
    names: CacheNames,
    app_origin: Url,
    base_path: impl Into<String>,
  ) -> Self {
    Self {
      transport,
      caches,
      names,
      app_origin,
      base_path: base_path.into(),
    }
  }

  pub fn caches(&self) -> &CacheStorage {
    &self.caches
  }

  /// Network first; any cache on transport failure; synthetic 503 otherwise.
  pub async fn network_first_api(&self, request: &Request) -> Served {
    match self.transport.fetch(request).await {
      Ok(response) => {
        self.put_if_cacheable(&self.names.runtime, &request.url, &response).await;
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        if let Some(cached) = self.lookup(&request.url).await {
          return Served::cache(cached);
        }
        Served::synthetic(Response::json(
          503,
          &json!({ "error": true, "message": OFFLINE_API_MESSAGE, "offline": true }),
        ))
      }
    }
  }

  /// Network first; the cached app shell on transport failure; a static
  /// offline page when no shell is cached.
  pub async fn network_first_navigation(&self, request: &Request) -> Served {
    match self.transport.fetch(request).await {
      Ok(response) => {
        self.put_if_cacheable(&self.names.app_shell, &request.url, &response).await;
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "offline, falling back to app shell");
        for path in self.shell_fallback_paths() {
          let Ok(url) = self.app_origin.join(&path) else {
            continue;
          };
          if let Some(cached) = self.lookup(&url).await {
            debug!(path = %path, "serving cached app shell");
            return Served::cache(cached);
          }
        }
        Served::synthetic(Response::html(200, OFFLINE_PAGE))
      }
    }
  }

  /// Cache first; the network on a miss; plain-text 503 when both fail.
  pub async fn cache_first_static(&self, request: &Request) -> Served {
    if let Some(cached) = self.lookup(&request.url).await {
      return Served::cache(cached);
    }

    match self.transport.fetch(request).await {
      Ok(response) => {
        self.put_if_cacheable(&self.names.runtime, &request.url, &response).await;
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "static asset unavailable");
        // A concurrent request may have populated the cache meanwhile
        if let Some(cached) = self.lookup(&request.url).await {
          return Served::cache(cached);
        }
        Served::synthetic(Response::text(503, OFFLINE_ASSET_MESSAGE))
      }
    }
  }

  /// App-shell index candidates, most specific first.
  fn shell_fallback_paths(&self) -> Vec<String> {
    let mut paths = vec![
      format!("{}/index.html", self.base_path),
      format!("{}/", self.base_path),
      "/index.html".to_string(),
      "/".to_string(),
    ];
    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths
  }

  /// Cache lookup across every generation; storage errors count as a miss.
  async fn lookup(&self, url: &Url) -> Option<Response> {
    match self.caches.match_any(url).await {
      Ok(hit) => hit.map(|c| {
        debug!(url = %url, cached_at = %c.cached_at, "cache hit");
        c.response
      }),
      Err(e) => {
        warn!(url = %url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Best-effort store: only complete same-origin 200s, and a storage failure
  /// never reaches the caller.
  async fn put_if_cacheable(&self, cache: &str, url: &Url, response: &Response) {
    if response.status != 200 || response.kind != ResponseKind::Basic {
      return;
    }
    if let Err(e) = self.caches.put(cache, url, response).await {
      warn!(cache, url = %url, error = %e, "cache put failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::net::mock::MockTransport;
  use crate::net::TransportError;

  const APP: &str = "http://localhost:9000/";
  const API: &str = "https://story-api.dicoding.dev/v1";

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn strategy(transport: Arc<MockTransport>, base_path: &str) -> CacheStrategy {
    CacheStrategy::new(
      transport,
      CacheStorage::new(Database::in_memory().unwrap()),
      CacheNames::new("story-app-v1", "runtime-cache-v1"),
      url(APP),
      base_path,
    )
  }

  #[test]
  fn test_classify() {
    let api = url(API);
    let get = |s: &str| Request::get(url(s));

    assert_eq!(
      classify(&Request::new(Method::Post, url("https://story-api.dicoding.dev/v1/stories")), &api),
      Route::Outbox
    );
    assert_eq!(
      classify(&Request::new(Method::Patch, url("https://story-api.dicoding.dev/v1/stories")), &api),
      Route::Passthrough
    );
    assert_eq!(
      classify(&Request::new(Method::Post, url("http://localhost:9000/form")), &api),
      Route::Passthrough
    );
    assert_eq!(classify(&get("http://localhost:9000/sockjs-node/info"), &api), Route::Ignored);
    assert_eq!(classify(&get("http://127.0.0.1/main.hot-update.js"), &api), Route::Ignored);
    assert_eq!(
      classify(&get("https://story-api.dicoding.dev/v1/stories"), &api),
      Route::ApiRead
    );
    assert_eq!(classify(&Request::navigate(url(APP)), &api), Route::Navigation);
    assert_eq!(
      classify(&get("http://localhost:9000/about").with_header("Accept", "text/html,*/*"), &api),
      Route::Navigation
    );
    assert_eq!(classify(&get("http://localhost:9000/app.js"), &api), Route::StaticAsset);
  }

  #[test]
  fn test_dev_paths_only_ignored_on_localhost() {
    let api = url(API);
    let request = Request::get(url("https://example.com/ws/feed.js"));
    assert_eq!(classify(&request, &api), Route::StaticAsset);
  }

  #[test]
  fn test_shell_fallback_order() {
    let s = strategy(Arc::new(MockTransport::new()), "/story-app");
    assert_eq!(
      s.shell_fallback_paths(),
      vec!["/story-app/index.html", "/story-app/", "/index.html", "/"]
    );
    let root = strategy(Arc::new(MockTransport::new()), "");
    assert_eq!(root.shell_fallback_paths(), vec!["/index.html", "/"]);
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_synthesizes_503() {
    let s = strategy(Arc::new(MockTransport::offline()), "");
    let served = s
      .network_first_api(&Request::get(url("https://story-api.dicoding.dev/v1/stories")))
      .await;

    assert_eq!(served.source, CacheSource::Synthetic);
    assert_eq!(served.response.status, 503);
    let body = served.response.body_json().unwrap();
    assert_eq!(body["offline"], true);
    assert_eq!(body["error"], true);
  }

  #[tokio::test]
  async fn test_api_falls_back_to_cached_copy() {
    let transport = Arc::new(MockTransport::new());
    let target = "https://story-api.dicoding.dev/v1/stories";
    transport.respond(Method::Get, target, Response::new(200, r#"{"listStory":[]}"#));
    let s = strategy(transport.clone(), "");

    let first = s.network_first_api(&Request::get(url(target))).await;
    assert_eq!(first.source, CacheSource::Network);

    transport.set_offline(true);
    let second = s.network_first_api(&Request::get(url(target))).await;
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.response.body, first.response.body);
  }

  #[tokio::test]
  async fn test_only_basic_200_responses_are_cached() {
    let transport = Arc::new(MockTransport::new());
    let cors = "https://story-api.dicoding.dev/v1/stories?page=1";
    let created = "http://localhost:9000/created.js";
    transport.respond(
      Method::Get,
      cors,
      Response::new(200, "[]").with_kind(ResponseKind::Cors),
    );
    transport.respond(Method::Get, created, Response::new(201, ""));
    let s = strategy(transport, "");

    s.network_first_api(&Request::get(url(cors))).await;
    s.cache_first_static(&Request::get(url(created))).await;

    assert!(s.caches().urls("runtime-cache-v1").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_shell() {
    let transport = Arc::new(MockTransport::offline());
    let s = strategy(transport, "/story-app");
    s.caches()
      .put(
        "story-app-v1",
        &url("http://localhost:9000/story-app/"),
        &Response::new(200, "<html>shell</html>"),
      )
      .await
      .unwrap();

    let served = s
      .network_first_navigation(&Request::navigate(url("http://localhost:9000/story-app/#/map")))
      .await;
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(served.response.body_text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_navigation_offline_without_shell_serves_offline_page() {
    let s = strategy(Arc::new(MockTransport::offline()), "");
    let served = s.network_first_navigation(&Request::navigate(url(APP))).await;

    assert_eq!(served.response.status, 200);
    assert_eq!(served.source, CacheSource::Synthetic);
    assert!(served.response.body_text().contains("offline"));
  }

  #[tokio::test]
  async fn test_navigation_online_caches_into_app_shell() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(Method::Get, APP, Response::new(200, "<html></html>"));
    let s = strategy(transport, "");

    s.network_first_navigation(&Request::navigate(url(APP))).await;
    assert_eq!(s.caches().urls("story-app-v1").await.unwrap(), vec![APP.to_string()]);
  }

  #[tokio::test]
  async fn test_cache_first_static_is_idempotent_offline() {
    let transport = Arc::new(MockTransport::new());
    let asset = "http://localhost:9000/app.bundle.js";
    transport.respond(Method::Get, asset, Response::new(200, "bundle-bytes"));
    let s = strategy(transport.clone(), "");

    s.cache_first_static(&Request::get(url(asset))).await;
    transport.set_offline(true);

    let a = s.cache_first_static(&Request::get(url(asset))).await;
    let b = s.cache_first_static(&Request::get(url(asset))).await;
    assert_eq!(a.response, b.response);
    assert_eq!(a.response.body, b"bundle-bytes".to_vec());
    // Served from cache without touching the network
    assert_eq!(transport.calls_to(asset), 1);
  }

  #[tokio::test]
  async fn test_static_miss_offline_yields_503_text() {
    let transport = Arc::new(MockTransport::new());
    let asset = "http://localhost:9000/font.woff2";
    transport.respond_once(Method::Get, asset, Err(TransportError::offline()));
    let s = strategy(transport, "");

    let served = s.cache_first_static(&Request::get(url(asset))).await;
    assert_eq!(served.response.status, 503);
    assert_eq!(served.response.body_text(), OFFLINE_ASSET_MESSAGE);
  }
}
