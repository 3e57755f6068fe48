//! `ferry`: resumable bulk identity migration.
//!
//! # Usage
//!
//! ```text
//! ferry introspect --export-dir ./export
//! ferry migrate --export-dir ./export --target-url https://id.example.com --api-token $TOKEN
//! ```
//!
//! Settings are read from `ferry.toml` (or `--config`), then `FERRY_*`
//! environment variables, then flags. Progress is checkpointed under
//! `checkpoint_dir`; re-running the same command resumes where the last run
//! stopped. Ctrl-C finishes the current wave, checkpoints it, and exits.

mod report;
mod settings;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use ferry_client::{ClientConfig, TargetClient};
use ferry_core::{
  config::MigrationConfig,
  migrate::migrate_records,
  pipeline::{Introspection, introspect},
};
use ferry_export::ExportDir;
use ferry_store_fs::FsCheckpointStore;
use settings::Overrides;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ferry", version, about = "Resumable bulk identity migration")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, global = true, value_name = "FILE", default_value = "ferry.toml")]
  config: PathBuf,

  /// Default log level; `RUST_LOG` directives still apply on top.
  #[arg(long, global = true, value_name = "LEVEL")]
  log_level: Option<LevelFilter>,

  #[command(flatten)]
  overrides: Overrides,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Unify the export and report conflicts without touching the target.
  Introspect(ExportArgs),
  /// Unify the export, publish the custom schema, and write every user.
  Migrate {
    #[command(flatten)]
    export: ExportArgs,
    #[command(flatten)]
    target: TargetArgs,
  },
}

#[derive(Args, Debug)]
struct ExportArgs {
  /// Root of the export (holds `accounts/` and `accountLinks/`).
  #[arg(long, value_name = "DIR")]
  export_dir: PathBuf,
}

#[derive(Args, Debug)]
struct TargetArgs {
  /// Base URL of the target API.
  #[arg(long, env = "FERRY_TARGET_URL", value_name = "URL")]
  target_url: String,

  /// API token for the target.
  #[arg(long, env = "FERRY_API_TOKEN", hide_env_values = true)]
  api_token: String,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(cli.log_level.unwrap_or(LevelFilter::INFO).into())
        .from_env_lossy(),
    )
    .init();

  let config = settings::load(&cli.config, cli.overrides)?;
  tracing::debug!(?config, "loaded configuration");

  let store = FsCheckpointStore::open(&config.checkpoint_dir)
    .await
    .with_context(|| format!("failed to open checkpoint dir {}", config.checkpoint_dir.display()))?;

  let cancel = CancellationToken::new();
  tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

  match cli.command {
    Command::Introspect(export) => {
      run_introspection(&export, &store, &config, &cancel).await?;
    }
    Command::Migrate { export, target } => {
      let result = run_introspection(&export, &store, &config, &cancel).await?;
      if !result.completed {
        return Ok(());
      }
      run_migration(result, target, &store, &config, &cancel).await?;
    }
  }
  Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
  if tokio::signal::ctrl_c().await.is_ok() {
    tracing::warn!("interrupted, finishing in-flight work before exiting");
    cancel.cancel();
  }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn run_introspection(
  export: &ExportArgs,
  store: &FsCheckpointStore,
  config: &MigrationConfig,
  cancel: &CancellationToken,
) -> Result<Introspection> {
  let source =
    ExportDir::new(&export.export_dir, config.file_open_limit).with_max_files(config.max_files);

  let result = introspect(&source, store, config, cancel)
    .await
    .with_context(|| format!("failed to introspect {}", export.export_dir.display()))?;
  print!("{}", report::introspection(&result));
  Ok(result)
}

async fn run_migration(
  result: Introspection,
  target: TargetArgs,
  store: &FsCheckpointStore,
  config: &MigrationConfig,
  cancel: &CancellationToken,
) -> Result<()> {
  let client = TargetClient::new(
    ClientConfig {
      base_url:    target.target_url,
      api_token:   target.api_token,
      custom_data: config.custom_data,
    },
    config.rate_policy(),
  )
  .context("failed to build target client")?;

  let mut unifier = result.unifier;
  let report = migrate_records(&mut unifier, &client, store, config, cancel)
    .await
    .context("migration stopped")?;
  print!("{}", report::migration(&report));

  if !report.failures.is_empty() {
    anyhow::bail!("{} accounts failed to migrate", report.failures.len());
  }
  Ok(())
}
