//! The introspection stage: source feed → link graph → unifier, checkpointed
//! one wave at a time.

use std::{
  collections::HashSet,
  future::Future,
  sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Result,
  checkpoint::CheckpointStore,
  concurrency::batch_until,
  config::MigrationConfig,
  links::LinkGraph,
  record::{LinkEdge, RecordId, SourceRecord},
  schema::ResolvedSchema,
  unify::{AccountUnifier, LoginCollision},
};

// ─── Source feed ─────────────────────────────────────────────────────────────

/// A bounded, enumerable feed of source records and link edges.
pub trait RecordSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Every declared link edge.
  fn links(&self) -> impl Future<Output = Result<Vec<LinkEdge>, Self::Error>> + Send + '_;

  /// Ids of every record not in `skip`. Records in `skip` must not be read.
  fn pending<'a>(
    &'a self,
    skip: &'a HashSet<RecordId>,
  ) -> impl Future<Output = Result<Vec<RecordId>, Self::Error>> + Send + 'a;

  /// Read one record.
  fn load<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<SourceRecord, Self::Error>> + Send + 'a;
}

#[derive(Debug, Error)]
#[error("no source record with id {0}")]
pub struct UnknownRecord(pub RecordId);

/// An in-memory feed.
#[derive(Debug, Default)]
pub struct MemorySource {
  records: Vec<SourceRecord>,
  links:   Vec<LinkEdge>,
  loads:   AtomicUsize,
}

impl MemorySource {
  pub fn new(records: Vec<SourceRecord>, links: Vec<LinkEdge>) -> Self {
    Self { records, links, loads: AtomicUsize::new(0) }
  }

  /// How many records have been read so far.
  pub fn loads(&self) -> usize { self.loads.load(Ordering::Relaxed) }
}

impl RecordSource for MemorySource {
  type Error = UnknownRecord;

  async fn links(&self) -> Result<Vec<LinkEdge>, UnknownRecord> { Ok(self.links.clone()) }

  async fn pending(&self, skip: &HashSet<RecordId>) -> Result<Vec<RecordId>, UnknownRecord> {
    Ok(
      self
        .records
        .iter()
        .filter(|r| !skip.contains(&r.id))
        .map(|r| r.id.clone())
        .collect(),
    )
  }

  async fn load(&self, id: &str) -> Result<SourceRecord, UnknownRecord> {
    self.loads.fetch_add(1, Ordering::Relaxed);
    self
      .records
      .iter()
      .find(|r| r.id == id)
      .cloned()
      .ok_or_else(|| UnknownRecord(id.to_owned()))
  }
}

// ─── Introspection ───────────────────────────────────────────────────────────

/// A record that could not be processed. It is left out of every completion
/// log, so the next run retries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
  pub id:    RecordId,
  pub error: String,
}

pub struct Introspection {
  pub unifier:    AccountUnifier,
  pub schema:     ResolvedSchema,
  pub collisions: Vec<LoginCollision>,
  /// Records evaluated during this run, restored ones excluded.
  pub processed:  usize,
  pub failures:   Vec<RecordFailure>,
  /// `false` if the run was cancelled before the feed was drained.
  pub completed:  bool,
}

/// Restore previous progress, then unify every pending source record in
/// waves of `concurrency_limit`, checkpointing after each wave.
///
/// Cancelling `cancel` lets the current wave finish and be checkpointed;
/// no further wave starts.
pub async fn introspect<R, S>(
  source: &R,
  store: &S,
  config: &MigrationConfig,
  cancel: &CancellationToken,
) -> Result<Introspection>
where
  R: RecordSource,
  S: CheckpointStore,
{
  let links = source.links().await.map_err(Error::source)?;
  let graph = LinkGraph::from_edges(&links);
  tracing::info!("loaded {} account links into {} groups", links.len(), graph.group_count());

  let mut unifier = AccountUnifier::new(graph, config.custom_data);
  let skip = unifier.restore(store, config.file_open_limit).await?;
  let pending = source.pending(&skip).await.map_err(Error::source)?;
  let total = pending.len();
  tracing::info!("{total} accounts to process");

  let unifier = Mutex::new(unifier);
  let failures = Mutex::new(Vec::new());
  let (unifier_ref, failures_ref) = (&unifier, &failures);
  let file_limit = config.file_open_limit;
  let progress_every = config.checkpoint_progress_limit.max(1);
  let mut last_logged = 0;

  let processed = batch_until(
    pending,
    config.concurrency_limit,
    cancel,
    move |id: RecordId| async move {
      let outcome = match source.load(&id).await {
        Ok(record) => unifier_ref.lock().await.add_record(record).map(drop),
        Err(e) => Err(Error::source(e)),
      };
      if let Err(e) = outcome {
        tracing::warn!("failed to process account id={id}: {e}");
        failures_ref.lock().await.push(RecordFailure { id, error: e.to_string() });
      }
    },
    move |processed| {
      if processed - last_logged >= progress_every || processed == total {
        tracing::info!("processed {processed} of {total} accounts");
        last_logged = processed;
      }
      async move { unifier_ref.lock().await.save(store, file_limit).await }
    },
  )
  .await?;

  let completed = processed == total;
  if !completed {
    tracing::warn!("cancelled after {processed} of {total} accounts; progress is saved");
  }

  let unifier = unifier.into_inner();
  let schema = unifier.resolve_schema();
  let collisions = unifier.login_collisions();
  for collision in &collisions {
    let others = collision
      .conflicts
      .iter()
      .map(|(id, login)| format!("id={id} login={login}"))
      .collect::<Vec<_>>()
      .join(", ");
    tracing::warn!(
      "account id={} original login={} converted to {} collides with {others}",
      collision.id,
      collision.original_login,
      collision.login,
    );
  }

  let stats = unifier.stats();
  tracing::info!(
    restored = stats.restored,
    created = stats.created,
    merged = stats.merged,
    conflicts = stats.conflicts,
    unverified = stats.unverified,
    "introspection finished with {} unified accounts",
    unifier.len()
  );

  Ok(Introspection {
    unifier,
    schema,
    collisions,
    processed,
    failures: failures.into_inner(),
    completed,
  })
}
