//! Error type for `ferry-export`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("io error at {path}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid export file {path}: {source}")]
  Parse {
    path:   PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// An account id that is not a plain file stem.
  #[error("invalid account id {0:?}")]
  InvalidId(String),

  /// The `id` inside an account file differs from its file name.
  #[error("account file {stem}.json declares id {id:?}")]
  IdMismatch { stem: String, id: String },

  #[error("file pool closed: {0}")]
  PoolClosed(#[from] ferry_core::concurrency::PoolClosed),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
