//! In-process checkpoint store, for tests and dry runs. Nothing survives the
//! process.

use std::{collections::HashMap, convert::Infallible};

use serde_json::Value;
use tokio::sync::Mutex;

use super::{CheckpointKey, CheckpointStore};

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
  snapshots: Mutex<HashMap<CheckpointKey, Value>>,
  logs:      Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryCheckpointStore {
  pub fn new() -> Self { Self::default() }

  /// Number of snapshot keys written so far.
  pub async fn snapshot_count(&self) -> usize { self.snapshots.lock().await.len() }
}

impl CheckpointStore for MemoryCheckpointStore {
  type Error = Infallible;

  async fn read_snapshot(&self, key: &CheckpointKey) -> Result<Option<Value>, Infallible> {
    Ok(self.snapshots.lock().await.get(key).cloned())
  }

  async fn write_snapshot(&self, key: &CheckpointKey, value: Value) -> Result<(), Infallible> {
    self.snapshots.lock().await.insert(key.clone(), value);
    Ok(())
  }

  async fn append_log(&self, log: &str, items: &[String]) -> Result<(), Infallible> {
    self
      .logs
      .lock()
      .await
      .entry(log.to_owned())
      .or_default()
      .extend(items.iter().cloned());
    Ok(())
  }

  async fn read_log(&self, log: &str) -> Result<Vec<String>, Infallible> {
    Ok(self.logs.lock().await.get(log).cloned().unwrap_or_default())
  }
}
