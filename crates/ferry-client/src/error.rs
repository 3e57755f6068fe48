//! Error type for `ferry-client`.

use ferry_core::{
  concurrency::PoolClosed,
  migrate::WriteError,
  scheduler::{RateLimited, RateWindow},
};
use reqwest::StatusCode;
use thiserror::Error;

/// Message the target returns once its user quota is used up.
pub(crate) const USER_LIMIT_REACHED: &str = "Maximum number of users has been reached";

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid client configuration: {0}")]
  Config(String),

  /// No response was received.
  #[error("{request} failed: {source}")]
  Transport {
    request: String,
    #[source]
    source:  reqwest::Error,
  },

  /// The target answered with a non-success status.
  #[error("{request} → {status}: {summary}")]
  Status {
    request: String,
    status:  StatusCode,
    summary: String,
    window:  Option<RateWindow>,
  },

  #[error("invalid response body from {request}: {source}")]
  Decode {
    request: String,
    #[source]
    source:  serde_json::Error,
  },

  /// A custom property already exists on the target with another type.
  #[error("schema property {name} exists with type {existing}, cannot change it to {wanted}")]
  SchemaMismatch {
    name:     String,
    existing: String,
    wanted:   String,
  },

  #[error(transparent)]
  Core(#[from] ferry_core::Error),

  #[error(transparent)]
  PoolClosed(#[from] PoolClosed),
}

impl Error {
  /// Whether the target refused because its user quota is exhausted.
  pub fn is_capacity_exhausted(&self) -> bool {
    matches!(self, Self::Status { summary, .. } if summary.contains(USER_LIMIT_REACHED))
  }
}

impl RateLimited for Error {
  fn rate_window(&self) -> Option<RateWindow> {
    match self {
      Self::Status { window, .. } => window.clone(),
      _ => None,
    }
  }
}

impl From<Error> for WriteError {
  fn from(e: Error) -> Self {
    if e.is_capacity_exhausted() {
      WriteError::CapacityExhausted(e.to_string())
    } else {
      WriteError::remote(e)
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
