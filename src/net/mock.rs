//! Scripted transport for tests.

use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{Method, Request, Response, Transport, TransportError};

type RouteKey = (Method, String);

#[derive(Default)]
struct MockState {
  offline: bool,
  once: HashMap<RouteKey, VecDeque<Result<Response, TransportError>>>,
  sticky: HashMap<RouteKey, Response>,
  calls: Vec<Request>,
}

/// Network double: answers from scripted routes, or fails every request while
/// offline. Unscripted routes get a 404.
#[derive(Default)]
pub struct MockTransport {
  state: Mutex<MockState>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn offline() -> Self {
    let transport = Self::new();
    transport.set_offline(true);
    transport
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  /// Answer every matching request with `response`.
  pub fn respond(&self, method: Method, url: &str, response: Response) {
    self
      .state
      .lock()
      .unwrap()
      .sticky
      .insert((method, url.to_string()), response);
  }

  /// Answer the next matching request with `result`; takes priority over
  /// sticky routes.
  pub fn respond_once(&self, method: Method, url: &str, result: Result<Response, TransportError>) {
    self
      .state
      .lock()
      .unwrap()
      .once
      .entry((method, url.to_string()))
      .or_default()
      .push_back(result);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn call_count(&self) -> usize {
    self.state.lock().unwrap().calls.len()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }
}

impl Transport for MockTransport {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, TransportError>> {
    async move {
      let mut state = self.state.lock().unwrap();
      state.calls.push(request.clone());

      let key = (request.method, request.url.to_string());
      if let Some(result) = state.once.get_mut(&key).and_then(VecDeque::pop_front) {
        return result;
      }
      if state.offline {
        return Err(TransportError::offline());
      }
      match state.sticky.get(&key) {
        Some(response) => Ok(response.clone()),
        None => Ok(Response::new(404, "not found")),
      }
    }
    .boxed()
  }
}
