//! Layered configuration: optional TOML file, then `FERRY_*` environment
//! variables, then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Args;
use ferry_core::{attributes::MergeStrategy, config::MigrationConfig};

/// Flags that take precedence over the file and the environment.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
  /// Records unified or written at once.
  #[arg(long, global = true, value_name = "N")]
  pub concurrency_limit: Option<usize>,

  /// Export files open at once.
  #[arg(long, global = true, value_name = "N")]
  pub file_open_limit: Option<usize>,

  /// Maximum simultaneous requests to the target API.
  #[arg(long, global = true, value_name = "N")]
  pub request_concurrency: Option<usize>,

  /// Directory holding checkpoints between runs.
  #[arg(long, global = true, value_name = "DIR")]
  pub checkpoint_dir: Option<PathBuf>,

  /// How extension attributes are migrated: flatten, stringify or exclude.
  #[arg(long, global = true, value_name = "STRATEGY")]
  pub custom_data: Option<MergeStrategy>,

  /// Only read this many accounts (preview runs).
  #[arg(long, global = true, value_name = "N")]
  pub max_files: Option<usize>,
}

impl Overrides {
  fn apply(self, config: &mut MigrationConfig) {
    if let Some(n) = self.concurrency_limit {
      config.concurrency_limit = n;
    }
    if let Some(n) = self.file_open_limit {
      config.file_open_limit = n;
    }
    if let Some(n) = self.request_concurrency {
      config.request_concurrency = n;
    }
    if let Some(dir) = self.checkpoint_dir {
      config.checkpoint_dir = dir;
    }
    if let Some(strategy) = self.custom_data {
      config.custom_data = strategy;
    }
    if self.max_files.is_some() {
      config.max_files = self.max_files;
    }
  }
}

/// Build the run configuration. A missing file is not an error.
pub fn load(path: &Path, overrides: Overrides) -> anyhow::Result<MigrationConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("FERRY"))
    .build()
    .with_context(|| format!("failed to read config file {}", path.display()))?;

  let mut config: MigrationConfig = settings
    .try_deserialize()
    .context("failed to deserialise MigrationConfig")?;
  overrides.apply(&mut config);

  anyhow::ensure!(config.concurrency_limit > 0, "concurrency_limit must be at least 1");
  anyhow::ensure!(config.file_open_limit > 0, "file_open_limit must be at least 1");
  anyhow::ensure!(config.request_concurrency > 0, "request_concurrency must be at least 1");
  Ok(config)
}
