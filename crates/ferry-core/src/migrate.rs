//! The write stage: unified records → target system.
//!
//! Each record is written once. Its snapshot is re-saved with the new
//! target id as soon as the write succeeds, so a re-run skips it.

use std::{
  future::Future,
  sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Result,
  checkpoint::{CheckpointStore, save_snapshot},
  concurrency::each_until,
  config::MigrationConfig,
  pipeline::RecordFailure,
  record::RecordId,
  schema::ResolvedSchema,
  unified::UnifiedRecord,
  unify::AccountUnifier,
};

#[derive(Debug, Error)]
pub enum WriteError {
  /// The target has hit a hard ceiling. Nothing else will succeed.
  #[error("target capacity exhausted: {0}")]
  CapacityExhausted(String),

  /// This call failed; other records may still succeed.
  #[error(transparent)]
  Remote(Box<dyn std::error::Error + Send + Sync>),
}

impl WriteError {
  pub fn remote<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Remote(Box::new(e))
  }
}

/// Creates identities in the target system.
pub trait TargetWriter: Send + Sync {
  /// Make sure every property in `schema` exists on the target.
  fn publish_schema<'a>(
    &'a self,
    schema: &'a ResolvedSchema,
  ) -> impl Future<Output = Result<(), WriteError>> + Send + 'a;

  /// Create or update the identity for `record`, returning its target id.
  fn write_record<'a>(
    &'a self,
    record: &'a UnifiedRecord,
    schema: &'a ResolvedSchema,
  ) -> impl Future<Output = Result<String, WriteError>> + Send + 'a;
}

#[derive(Debug, Default)]
pub struct MigrationReport {
  pub written:   usize,
  /// Records that already carried a target id.
  pub skipped:   usize,
  pub failures:  Vec<RecordFailure>,
  pub cancelled: bool,
}

/// Publish the resolved schema, then write every unified record that has no
/// target id yet, at most `concurrency_limit` at a time.
///
/// Per-record remote failures are collected in the report. Capacity
/// exhaustion stops dispatch and is returned as
/// [`Error::ResourceExhausted`] once in-flight writes settle.
pub async fn migrate_records<W, S>(
  unifier: &mut AccountUnifier,
  writer: &W,
  store: &S,
  config: &MigrationConfig,
  cancel: &CancellationToken,
) -> Result<MigrationReport>
where
  W: TargetWriter,
  S: CheckpointStore,
{
  let schema = unifier.resolve_schema();
  tracing::info!("publishing {} custom schema properties", schema.properties.len());
  writer.publish_schema(&schema).await?;

  let (pending, done): (Vec<&UnifiedRecord>, Vec<&UnifiedRecord>) =
    unifier.records().into_iter().partition(|r| r.target_id.is_none());
  let skipped = done.len();
  let pending: Vec<UnifiedRecord> = pending.into_iter().cloned().collect();
  let total = pending.len();
  tracing::info!("{total} accounts to migrate, {skipped} already migrated");

  let written = Mutex::new(Vec::<(RecordId, String)>::new());
  let failures = Mutex::new(Vec::new());
  let count = AtomicUsize::new(0);
  let (schema_ref, written_ref, failures_ref, count_ref) = (&schema, &written, &failures, &count);
  let progress_every = config.checkpoint_progress_limit.max(1);
  let run = cancel.child_token();

  let result = each_until(
    pending,
    config.concurrency_limit,
    run.clone(),
    move |mut record: UnifiedRecord, run| async move {
      match writer.write_record(&record, schema_ref).await {
        Ok(target_id) => {
          record.target_id = Some(target_id.clone());
          if let Err(e) = save_snapshot(store, &record).await {
            run.cancel();
            return Err(e);
          }
          tracing::debug!("migrated account id={} as {target_id}", record.id);
          written_ref.lock().await.push((record.id, target_id));
          let n = count_ref.fetch_add(1, Ordering::Relaxed) + 1;
          if n % progress_every == 0 {
            tracing::info!("migrated {n} of {total} accounts");
          }
          Ok(())
        }
        Err(WriteError::CapacityExhausted(message)) => {
          tracing::error!("account id={}: {message}. Stopping.", record.id);
          run.cancel();
          Err(Error::ResourceExhausted(message))
        }
        Err(e) => {
          tracing::warn!("failed to migrate account id={}: {e}", record.id);
          failures_ref
            .lock()
            .await
            .push(RecordFailure { id: record.id, error: e.to_string() });
          Ok(())
        }
      }
    },
  )
  .await;

  let written = written.into_inner();
  for (id, target_id) in &written {
    unifier.set_target_id(id, target_id.clone());
  }
  result?;

  let report = MigrationReport {
    written: written.len(),
    skipped,
    failures: failures.into_inner(),
    cancelled: cancel.is_cancelled(),
  };
  tracing::info!(
    written = report.written,
    skipped = report.skipped,
    failed = report.failures.len(),
    "migration finished"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, sync::Mutex as StdMutex};

  use serde_json::json;

  use super::*;
  use crate::{
    attributes::MergeStrategy,
    checkpoint::{MemoryCheckpointStore, load_snapshot},
    links::LinkGraph,
    record::SourceRecord,
  };

  #[derive(Debug, Error)]
  #[error("remote said no")]
  struct Rejected;

  #[derive(Default)]
  struct FakeWriter {
    reject:  HashSet<String>,
    exhaust: HashSet<String>,
    schemas: StdMutex<Vec<usize>>,
    written: StdMutex<Vec<String>>,
  }

  impl TargetWriter for FakeWriter {
    async fn publish_schema(&self, schema: &ResolvedSchema) -> Result<(), WriteError> {
      self.schemas.lock().unwrap().push(schema.properties.len());
      Ok(())
    }

    async fn write_record(
      &self,
      record: &UnifiedRecord,
      _schema: &ResolvedSchema,
    ) -> Result<String, WriteError> {
      if self.exhaust.contains(&record.id) {
        return Err(WriteError::CapacityExhausted("user limit reached".into()));
      }
      if self.reject.contains(&record.id) {
        return Err(WriteError::remote(Rejected));
      }
      self.written.lock().unwrap().push(record.id.clone());
      Ok(format!("t-{}", record.id))
    }
  }

  fn unifier(n: usize) -> AccountUnifier {
    let mut unifier = AccountUnifier::new(LinkGraph::new(), MergeStrategy::Flatten);
    for i in 0..n {
      let email = format!("{i}@x.com");
      unifier
        .add_record(SourceRecord::new(i.to_string(), &email, &email).with_attribute("n", json!(i)))
        .unwrap();
    }
    unifier
  }

  fn config(concurrency_limit: usize) -> MigrationConfig {
    MigrationConfig { concurrency_limit, ..Default::default() }
  }

  #[tokio::test]
  async fn writes_and_checkpoints_every_record() {
    let store = MemoryCheckpointStore::new();
    let writer = FakeWriter::default();
    let mut unifier = unifier(5);

    let report = migrate_records(&mut unifier, &writer, &store, &config(2), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(report.written, 5);
    assert_eq!(*writer.schemas.lock().unwrap(), [1]);
    assert_eq!(unifier.get("3").unwrap().target_id.as_deref(), Some("t-3"));
    let saved: UnifiedRecord = load_snapshot(&store, &UnifiedRecord::key_for("3"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(saved.target_id.as_deref(), Some("t-3"));
  }

  #[tokio::test]
  async fn already_migrated_records_are_skipped() {
    let store = MemoryCheckpointStore::new();
    let writer = FakeWriter::default();
    let mut unifier = unifier(3);
    unifier.set_target_id("1", "t-old".into());

    let report = migrate_records(&mut unifier, &writer, &store, &config(2), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.skipped, 1);

    let again = migrate_records(&mut unifier, &writer, &store, &config(2), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(again.written, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(writer.written.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn remote_failures_do_not_stop_the_run() {
    let store = MemoryCheckpointStore::new();
    let writer = FakeWriter { reject: HashSet::from(["2".to_string()]), ..Default::default() };
    let mut unifier = unifier(4);

    let report = migrate_records(&mut unifier, &writer, &store, &config(1), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(report.written, 3);
    assert_eq!(report.failures, [RecordFailure { id: "2".into(), error: "remote said no".into() }]);
    assert!(unifier.get("2").unwrap().target_id.is_none());
  }

  #[tokio::test]
  async fn capacity_exhaustion_aborts_the_run() {
    let store = MemoryCheckpointStore::new();
    let writer = FakeWriter { exhaust: HashSet::from(["1".to_string()]), ..Default::default() };
    let mut unifier = unifier(5);

    let result =
      migrate_records(&mut unifier, &writer, &store, &config(1), &CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::ResourceExhausted(_))));
    // Records are dispatched in id order with a single worker.
    assert_eq!(*writer.written.lock().unwrap(), ["0"]);
    assert_eq!(unifier.get("0").unwrap().target_id.as_deref(), Some("t-0"));
  }

  #[tokio::test]
  async fn cancelled_run_writes_nothing_new() {
    let store = MemoryCheckpointStore::new();
    let writer = FakeWriter::default();
    let mut unifier = unifier(3);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = migrate_records(&mut unifier, &writer, &store, &config(2), &cancel)
      .await
      .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.written, 0);
  }
}
