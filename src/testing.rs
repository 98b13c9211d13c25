//! In-memory transport for unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::api::{Method, Request, Response, Transport};
use crate::error::ApiResult;

#[derive(Default)]
struct MockState {
  routes: HashMap<(Method, String), VecDeque<Response>>,
  requests: Vec<Request>,
}

/// Scripted transport. Responses are matched on method and path (query
/// string ignored) and consumed in order; the last one for a route repeats.
/// Unscripted routes answer 404.
///
/// A gated transport holds every request until [`release`](Self::release).
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
  state: Arc<Mutex<MockState>>,
  gate: Option<Arc<Notify>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn gated() -> Self {
    Self {
      state: Arc::default(),
      gate: Some(Arc::new(Notify::new())),
    }
  }

  pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
    let response = if body.is_null() {
      Response::new(status, "")
    } else {
      Response::json(status, &body)
    };
    self
      .state
      .lock()
      .unwrap()
      .routes
      .entry((method, path.to_string()))
      .or_default()
      .push_back(response);
    self
  }

  /// Let one held request through.
  pub fn release(&self) {
    if let Some(gate) = &self.gate {
      gate.notify_one();
    }
  }

  pub fn requests(&self) -> Vec<Request> {
    self.state.lock().unwrap().requests.clone()
  }

  /// Wait until `n` requests have been received.
  pub async fn wait_for_requests(&self, n: usize) {
    for _ in 0..500 {
      if self.requests().len() >= n {
        return;
      }
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("expected {} requests, got {}", n, self.requests().len());
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: Request) -> ApiResult<Response> {
    let route = (request.method, request.path.clone());
    self.state.lock().unwrap().requests.push(request);

    if let Some(gate) = &self.gate {
      gate.notified().await;
    }

    let mut state = self.state.lock().unwrap();
    let response = match state.routes.get_mut(&route) {
      Some(queue) if queue.len() > 1 => queue.pop_front(),
      Some(queue) => queue.front().cloned(),
      None => None,
    };
    Ok(response.unwrap_or_else(|| Response::new(404, "")))
  }
}
