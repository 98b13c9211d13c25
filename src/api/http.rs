//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::transport::{Method, Request, Response, Transport};
use crate::error::{ApiError, ApiResult};

const USER_AGENT_VALUE: &str = concat!("crudcache/", env!("CARGO_PKG_VERSION"));

/// Sends requests to `<base_url>/<path>` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
    let parsed = Url::parse(base_url).map_err(|e| ApiError::InvalidBaseUrl {
      url: base_url.to_string(),
      message: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() {
      return Err(ApiError::InvalidBaseUrl {
        url: base_url.to_string(),
        message: "not a base URL".to_string(),
      });
    }

    let mut default_headers = HeaderMap::new();
    default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .default_headers(default_headers)
      .build()
      .map_err(|e| ApiError::Network {
        path: base_url.to_string(),
        message: format!("failed to create HTTP client: {}", e),
      })?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: Request) -> ApiResult<Response> {
    let url = format!("{}/{}", self.base_url, request.target());
    debug!(method = request.method.as_str(), url = %url, "sending request");

    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, &url);
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let network_error = |e: reqwest::Error| ApiError::Network {
      path: request.path.clone(),
      message: e.to_string(),
    };

    let response = builder.send().await.map_err(network_error)?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(network_error)?;
    debug!(status, url = %url, "response received");

    Ok(Response::new(status, body))
  }
}
