//! The `CheckpointStore` trait and the two checkpoint flavours built on it.
//!
//! - **Structured snapshots** ([`Snapshot`]): an entity converts itself to an
//!   explicit persisted struct, which is written whole under a deterministic
//!   [`CheckpointKey`]. Used for entities that mutate across a run.
//! - **Completion logs** ([`LogCheckpoint`]): identifiers are buffered in
//!   memory and appended to a named, append-only log on save. Used for
//!   write-once "this record is done" markers.
//!
//! Backends (e.g. `ferry-store-fs`) implement only the raw storage operations;
//! serialization and buffering live here.

mod memory;

use std::{fmt, future::Future};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use memory::MemoryCheckpointStore;

use crate::{Error, Result, concurrency};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Where a structured snapshot lives: a namespace plus an entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey {
  pub namespace: String,
  pub id:        String,
}

impl CheckpointKey {
  pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
    Self { namespace: namespace.into(), id: id.into() }
  }
}

impl fmt::Display for CheckpointKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.namespace, self.id)
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over durable checkpoint storage.
///
/// Snapshot writes replace the previous value for the key. Log appends never
/// touch existing entries; a crash mid-append must leave a readable prefix.
pub trait CheckpointStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read the snapshot stored under `key`, or `None` on first run.
  fn read_snapshot<'a>(
    &'a self,
    key: &'a CheckpointKey,
  ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send + 'a;

  /// Replace the snapshot stored under `key`.
  fn write_snapshot<'a>(
    &'a self,
    key: &'a CheckpointKey,
    value: Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Append `items` to the log named `log`, one entry per line, in a single
  /// flush.
  fn append_log<'a>(
    &'a self,
    log: &'a str,
    items: &'a [String],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Every complete entry ever appended to `log`, in append order.
  fn read_log<'a>(
    &'a self,
    log: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;
}

// ─── Structured snapshots ────────────────────────────────────────────────────

/// An entity that checkpoints itself through an explicit persisted form.
pub trait Snapshot: Sized {
  type Persisted: Serialize + DeserializeOwned;

  fn checkpoint_key(&self) -> CheckpointKey;

  fn to_persisted(&self) -> Self::Persisted;

  fn from_persisted(persisted: Self::Persisted) -> Self;
}

/// Serialize `item` and write it under its own key.
pub async fn save_snapshot<S, T>(store: &S, item: &T) -> Result<()>
where
  S: CheckpointStore,
  T: Snapshot,
{
  let value = serde_json::to_value(item.to_persisted())?;
  store
    .write_snapshot(&item.checkpoint_key(), value)
    .await
    .map_err(Error::store)
}

/// Load the snapshot under `key`, or `None` if nothing was saved yet.
pub async fn load_snapshot<S, T>(store: &S, key: &CheckpointKey) -> Result<Option<T>>
where
  S: CheckpointStore,
  T: Snapshot,
{
  let Some(value) = store.read_snapshot(key).await.map_err(Error::store)? else {
    return Ok(None);
  };
  let persisted: T::Persisted = serde_json::from_value(value)?;
  Ok(Some(T::from_persisted(persisted)))
}

/// Like [`load_snapshot`], but falls back to the default persisted form on
/// first run.
pub async fn restore_snapshot<S, T>(store: &S, key: &CheckpointKey) -> Result<T>
where
  S: CheckpointStore,
  T: Snapshot,
  T::Persisted: Default,
{
  Ok(
    load_snapshot(store, key)
      .await?
      .unwrap_or_else(|| T::from_persisted(T::Persisted::default())),
  )
}

// ─── Completion logs ─────────────────────────────────────────────────────────

/// A buffered, append-only list of identifiers.
#[derive(Debug, Clone)]
pub struct LogCheckpoint {
  name:    String,
  pending: Vec<String>,
}

impl LogCheckpoint {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), pending: Vec::new() }
  }

  /// Buffer `item`; nothing reaches storage until [`save`](Self::save).
  pub fn add(&mut self, item: impl Into<String>) { self.pending.push(item.into()); }

  pub fn pending(&self) -> &[String] { &self.pending }

  /// Append all buffered items and clear the buffer. On failure the buffer
  /// is kept so the next save retries it.
  pub async fn save<S: CheckpointStore>(&mut self, store: &S) -> Result<()> {
    if self.pending.is_empty() {
      return Ok(());
    }
    store
      .append_log(&self.name, &self.pending)
      .await
      .map_err(Error::store)?;
    self.pending.clear();
    Ok(())
  }

  /// Every non-empty entry saved so far.
  pub async fn read<S: CheckpointStore>(&self, store: &S) -> Result<Vec<String>> {
    let mut items = store.read_log(&self.name).await.map_err(Error::store)?;
    items.retain(|item| !item.is_empty());
    Ok(items)
  }

  /// Replay every saved entry through `f` with at most `limit` in flight.
  /// Returns the number of entries replayed.
  pub async fn process<S, F, Fut>(&self, store: &S, limit: usize, f: F) -> Result<usize>
  where
    S: CheckpointStore,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    tracing::info!("loading log checkpoint {}", self.name);
    let items = self.read(store).await?;
    let count = items.len();
    if count == 0 {
      return Ok(0);
    }
    tracing::info!("processing {count} log items from {}", self.name);
    concurrency::each(items, limit, |item, _cancel| f(item)).await?;
    Ok(count)
  }
}
