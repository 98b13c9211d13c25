//! Transport abstraction: requests relative to a backend base URL.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

/// A request against a resource path such as `Invoice` or `Invoice/42`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub query: Vec<(&'static str, String)>,
  pub body: Option<Value>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Post, path).with_body(body)
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Put, path).with_body(body)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn with_query(mut self, name: &'static str, value: impl Into<String>) -> Self {
    self.query.push((name, value.into()));
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Path plus percent-encoded query string, e.g.
  /// `Invoice?page=0&size=20&example=%7B%22status%22%3A%22open%22%7D`.
  pub fn target(&self) -> String {
    if self.query.is_empty() {
      return self.path.clone();
    }
    let query = self
      .query
      .iter()
      .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
      .collect::<Vec<_>>()
      .join("&");
    format!("{}?{}", self.path, query)
  }
}

/// Raw response: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub body: String,
}

impl Response {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  /// Response with a JSON body.
  pub fn json(status: u16, body: &Value) -> Self {
    Self::new(status, body.to_string())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Map the status to an error or parse the body. An empty body is `null`.
  pub fn into_value(self, path: &str) -> ApiResult<Value> {
    if self.status == 404 {
      return Err(ApiError::NotFound {
        path: path.to_string(),
      });
    }
    if !self.is_success() {
      return Err(ApiError::Status {
        status: self.status,
        path: path.to_string(),
        body: self.body,
      });
    }
    if self.body.trim().is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_str(&self.body).map_err(|e| ApiError::Decode {
      path: path.to_string(),
      message: e.to_string(),
    })
  }
}

/// Decode an already parsed body into the expected shape.
pub(crate) fn decode<T: DeserializeOwned>(value: Value, path: &str) -> ApiResult<T> {
  serde_json::from_value(value).map_err(|e| ApiError::Decode {
    path: path.to_string(),
    message: e.to_string(),
  })
}

/// Issues requests against a REST backend.
///
/// Implementations return whatever status the server answered with; mapping
/// statuses to errors happens in [`Response::into_value`]. Transport-level
/// failures are reported as [`ApiError::Network`].
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: Request) -> ApiResult<Response>;
}
