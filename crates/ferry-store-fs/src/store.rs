//! [`FsCheckpointStore`]: the filesystem implementation of
//! [`CheckpointStore`].

use std::{
  collections::HashSet,
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::Arc,
};

use ferry_core::checkpoint::{CheckpointKey, CheckpointStore};
use serde_json::Value;
use tokio::{fs, io::AsyncWriteExt as _, sync::Mutex};

use crate::{Error, Result};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Checkpoints stored as plain files under one root directory.
///
/// Cloning is cheap; clones share the cache of directories already created.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
  root:       Arc<PathBuf>,
  known_dirs: Arc<Mutex<HashSet<PathBuf>>>,
}

impl FsCheckpointStore {
  /// Open (or create) a checkpoint directory at `root`.
  pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref().to_path_buf();
    fs::create_dir_all(&root).await.map_err(Error::io(&root))?;
    Ok(Self {
      known_dirs: Arc::new(Mutex::new(HashSet::from([root.clone()]))),
      root:       Arc::new(root),
    })
  }

  pub fn root(&self) -> &Path { &self.root }

  /// `<root>/<namespace>/<id>.json`
  pub fn snapshot_path(&self, key: &CheckpointKey) -> Result<PathBuf> {
    check_name(&key.namespace)?;
    check_segment(&key.id)?;
    Ok(self.root.join(&key.namespace).join(format!("{}.json", key.id)))
  }

  /// `<root>/<name>.txt`
  pub fn log_path(&self, name: &str) -> Result<PathBuf> {
    check_name(name)?;
    Ok(self.root.join(format!("{name}.txt")))
  }

  async fn ensure_parent(&self, path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else { return Ok(()) };
    let mut known = self.known_dirs.lock().await;
    if !known.contains(dir) {
      fs::create_dir_all(dir).await.map_err(Error::io(dir))?;
      known.insert(dir.to_path_buf());
    }
    Ok(())
  }
}

/// Names may contain `/`-separated segments; none may be empty or walk
/// upwards.
fn check_name(name: &str) -> Result<()> {
  name.split('/').try_for_each(check_segment).map_err(|_| Error::InvalidName(name.to_owned()))
}

fn check_segment(segment: &str) -> Result<()> {
  let bad = segment.is_empty()
    || segment == "."
    || segment == ".."
    || segment.contains(['/', '\\', '\0']);
  if bad {
    return Err(Error::InvalidName(segment.to_owned()));
  }
  Ok(())
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

impl CheckpointStore for FsCheckpointStore {
  type Error = Error;

  async fn read_snapshot(&self, key: &CheckpointKey) -> Result<Option<Value>> {
    let path = self.snapshot_path(key)?;
    let bytes = match fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(Error::io(&path)(e)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|source| Error::Corrupt { path, source })?;
    Ok(Some(value))
  }

  async fn write_snapshot(&self, key: &CheckpointKey, value: Value) -> Result<()> {
    let path = self.snapshot_path(key)?;
    self.ensure_parent(&path).await?;

    // Write beside the target and rename over it, so readers never see a
    // partial file.
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(&value)?;
    fs::write(&tmp, &bytes).await.map_err(Error::io(&tmp))?;
    fs::rename(&tmp, &path).await.map_err(Error::io(&path))?;
    Ok(())
  }

  async fn append_log(&self, log: &str, items: &[String]) -> Result<()> {
    if items.is_empty() {
      return Ok(());
    }
    let path = self.log_path(log)?;
    self.ensure_parent(&path).await?;

    let mut chunk = items.join("\n");
    chunk.push('\n');

    let mut file = fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .await
      .map_err(Error::io(&path))?;
    file.write_all(chunk.as_bytes()).await.map_err(Error::io(&path))?;
    file.sync_data().await.map_err(Error::io(&path))?;
    Ok(())
  }

  async fn read_log(&self, log: &str) -> Result<Vec<String>> {
    let path = self.log_path(log)?;
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(Error::io(&path)(e)),
    };

    let mut lines: Vec<String> = content.split('\n').map(str::to_owned).collect();
    // `split` always yields a final piece: empty after a complete flush,
    // otherwise the remains of an interrupted one.
    if let Some(tail) = lines.pop()
      && !tail.is_empty()
    {
      tracing::warn!("ignoring incomplete entry {tail:?} at end of {}", path.display());
    }
    lines.retain(|line| !line.is_empty());
    Ok(lines)
  }
}
