//! Error types for entity access operations.

use thiserror::Error;

/// Result type for entity access operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the transport, the entity modules and the cache.
///
/// Every operation either resolves with data or returns one of these; nothing
/// is retried or swallowed locally.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("request to {path} failed: {message}")]
  Network { path: String, message: String },

  #[error("{path} returned HTTP {status}")]
  Status {
    status: u16,
    path: String,
    body: String,
  },

  #[error("{path} not found")]
  NotFound { path: String },

  #[error("failed to decode response from {path}: {message}")]
  Decode { path: String, message: String },

  #[error("failed to encode request: {0}")]
  Encode(String),

  #[error("page size must be greater than zero")]
  InvalidPageSize,

  #[error("invalid base URL {url}: {message}")]
  InvalidBaseUrl { url: String, message: String },

  #[error("cache error: {0}")]
  Cache(String),
}

impl ApiError {
  /// HTTP status carried by this error, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Status { status, .. } => Some(*status),
      ApiError::NotFound { .. } => Some(404),
      _ => None,
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, ApiError::NotFound { .. })
  }
}

impl From<rusqlite::Error> for ApiError {
  fn from(e: rusqlite::Error) -> Self {
    ApiError::Cache(e.to_string())
  }
}
