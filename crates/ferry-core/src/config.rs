//! Run-level configuration shared by every stage.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{attributes::MergeStrategy, scheduler::RatePolicy};

/// Tunables for one migration run, deserialised from `ferry.toml` and
/// `FERRY_*` environment variables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
  /// Local transaction concurrency: records unified or written at once.
  pub concurrency_limit:         usize,
  /// Source files open at once.
  pub file_open_limit:           usize,
  /// Maximum simultaneous in-flight calls to the target API.
  pub request_concurrency:       usize,
  pub rate_limit_margin:         u64,
  pub rate_limit_buffer_ms:      u64,
  pub checkpoint_dir:            PathBuf,
  /// Log progress every this many processed records.
  pub checkpoint_progress_limit: usize,
  pub custom_data:               MergeStrategy,
  /// Only read this many source accounts. Preview runs only.
  pub max_files:                 Option<usize>,
}

impl Default for MigrationConfig {
  fn default() -> Self {
    Self {
      concurrency_limit:         30,
      file_open_limit:           100,
      request_concurrency:       70,
      rate_limit_margin:         10,
      rate_limit_buffer_ms:      1000,
      checkpoint_dir:            PathBuf::from("./tmp"),
      checkpoint_progress_limit: 10_000,
      custom_data:               MergeStrategy::default(),
      max_files:                 None,
    }
  }
}

impl MigrationConfig {
  /// The scheduler policy implied by the request settings.
  pub fn rate_policy(&self) -> RatePolicy {
    RatePolicy {
      concurrency:     self.request_concurrency,
      safety_margin:   self.rate_limit_margin,
      reset_buffer_ms: self.rate_limit_buffer_ms,
    }
  }
}
