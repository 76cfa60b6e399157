//! Network transport backed by reqwest.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::time::Duration;
use url::Url;

use super::{
  Headers, Method, Request, Response, ResponseKind, Transport, TransportError, TransportErrorKind,
};

/// Real network access.
///
/// Responses whose final URL shares the application origin are reported as
/// `basic`; everything else as `cors`, the same way a browser would label them
/// for a page served from `app_origin`.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  app_origin: Url,
}

impl HttpTransport {
  pub fn new(app_origin: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, app_origin })
  }

  async fn send(&self, request: &Request) -> Result<Response, TransportError> {
    let method = to_reqwest_method(request.method);
    let mut builder = self.client.request(method, request.url.clone());

    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(classify_error)?;

    let status = response.status();
    let kind = if super::same_origin(response.url(), &self.app_origin) {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response.bytes().await.map_err(classify_error)?;

    let mut response = Response::new(status.as_u16(), body.to_vec()).with_kind(kind);
    response.headers = headers;
    Ok(response)
  }
}

impl Transport for HttpTransport {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, TransportError>> {
    self.send(request).boxed()
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

fn classify_error(e: reqwest::Error) -> TransportError {
  let kind = if e.is_builder() {
    TransportErrorKind::Request
  } else if e.is_timeout() {
    TransportErrorKind::Timeout
  } else if e.is_connect() {
    TransportErrorKind::Connect
  } else {
    TransportErrorKind::Other
  };
  TransportError::new(kind, e.to_string())
}
