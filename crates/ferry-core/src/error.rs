//! Error types for `ferry-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A checkpoint backend failed. Always fatal for the run.
  #[error("checkpoint store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The source feed could not be listed or a record could not be read.
  #[error("source feed error: {0}")]
  Source(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A target-system call failed outside per-record processing.
  #[error("target system error: {0}")]
  Target(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The target system reported a hard capacity ceiling. Retrying cannot
  /// help, so the whole run stops.
  #[error("target capacity exhausted: {0}")]
  ResourceExhausted(String),

  #[error("{0} is a reserved attribute name")]
  ReservedAttribute(String),

  #[error("concurrency pool is closed")]
  PoolClosed(#[from] crate::concurrency::PoolClosed),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub(crate) fn source<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Source(Box::new(e))
  }
}

impl From<crate::migrate::WriteError> for Error {
  fn from(e: crate::migrate::WriteError) -> Self {
    use crate::migrate::WriteError;
    match e {
      WriteError::CapacityExhausted(message) => Self::ResourceExhausted(message),
      WriteError::Remote(source) => Self::Target(source),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
