//! [`ExportDir`]: a directory export as a [`RecordSource`].

use std::{
  collections::HashSet,
  io::ErrorKind,
  path::{Path, PathBuf},
};

use ferry_core::{
  concurrency::{ConcurrencyPool, map_to_object},
  pipeline::RecordSource,
  record::{LinkEdge, RecordId, SourceRecord},
};
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::{
  Error, Result,
  model::{AccountFile, AccountLinkFile},
};

const ACCOUNTS_DIR: &str = "accounts";
const LINKS_DIR: &str = "accountLinks";

/// A directory export. At most `file_open_limit` files are read at once,
/// however many callers are loading records.
#[derive(Debug, Clone)]
pub struct ExportDir {
  root:            PathBuf,
  max_files:       Option<usize>,
  file_open_limit: usize,
  open_files:      ConcurrencyPool,
}

impl ExportDir {
  pub fn new(root: impl Into<PathBuf>, file_open_limit: usize) -> Self {
    Self {
      root: root.into(),
      max_files: None,
      file_open_limit,
      open_files: ConcurrencyPool::new(file_open_limit),
    }
  }

  /// Only ever list the first `max_files` accounts (in file-name order),
  /// whether or not they were already processed.
  pub fn with_max_files(mut self, max_files: Option<usize>) -> Self {
    self.max_files = max_files;
    self
  }

  pub fn root(&self) -> &Path { &self.root }

  async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
    let token = self.open_files.acquire().await?;
    let bytes = fs::read(path).await;
    token.release();

    let bytes = bytes.map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
    serde_json::from_slice(&bytes).map_err(|source| Error::Parse { path: path.to_path_buf(), source })
  }
}

/// Stems of every `.json` file in `dir`, sorted. A missing directory is
/// treated as empty.
async fn list_stems(dir: &Path) -> Result<Vec<String>> {
  let io = |source| Error::Io { path: dir.to_path_buf(), source };
  let mut entries = match fs::read_dir(dir).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == ErrorKind::NotFound => {
      tracing::warn!("could not load {}, skipping", dir.display());
      return Ok(Vec::new());
    }
    Err(e) => return Err(io(e)),
  };

  let mut stems = Vec::new();
  while let Some(entry) = entries.next_entry().await.map_err(io)? {
    let path = entry.path();
    if path.extension().is_some_and(|ext| ext == "json")
      && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
    {
      stems.push(stem.to_owned());
    }
  }
  stems.sort();
  Ok(stems)
}

fn check_id(id: &str) -> Result<()> {
  if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
    return Err(Error::InvalidId(id.to_owned()));
  }
  Ok(())
}

// ─── RecordSource impl ───────────────────────────────────────────────────────

impl RecordSource for ExportDir {
  type Error = Error;

  async fn links(&self) -> Result<Vec<LinkEdge>> {
    let dir = self.root.join(LINKS_DIR);
    let stems = list_stems(&dir).await?;
    tracing::info!("loading {} account links", stems.len());

    let dir = &dir;
    let by_stem = map_to_object(stems, self.file_open_limit, move |stem| async move {
      let link: AccountLinkFile = self.read_json(&dir.join(format!("{stem}.json"))).await?;
      Ok::<_, Error>(Some((stem, LinkEdge::from(link))))
    })
    .await?;

    let mut edges: Vec<(String, LinkEdge)> = by_stem.into_iter().collect();
    edges.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(edges.into_iter().map(|(_, edge)| edge).collect())
  }

  async fn pending(&self, skip: &HashSet<RecordId>) -> Result<Vec<RecordId>> {
    let mut stems = list_stems(&self.root.join(ACCOUNTS_DIR)).await?;
    if let Some(max) = self.max_files {
      stems.truncate(max);
    }
    let listed = stems.len();
    stems.retain(|stem| !skip.contains(stem));
    tracing::debug!("{listed} account files, {} not yet processed", stems.len());
    Ok(stems)
  }

  async fn load(&self, id: &str) -> Result<SourceRecord> {
    check_id(id)?;
    let path = self.root.join(ACCOUNTS_DIR).join(format!("{id}.json"));
    let account: AccountFile = self.read_json(&path).await?;
    account.into_record(id)
  }
}
