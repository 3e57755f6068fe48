//! Tests for `FsCheckpointStore` against a temporary directory.

use ferry_core::{
  checkpoint::{CheckpointKey, CheckpointStore, LogCheckpoint, load_snapshot, save_snapshot},
  record::SourceRecord,
  unified::UnifiedRecord,
};
use serde_json::json;
use tempfile::TempDir;

use crate::{Error, FsCheckpointStore};

async fn store() -> (TempDir, FsCheckpointStore) {
  let dir = tempfile::tempdir().expect("temp dir");
  let store = FsCheckpointStore::open(dir.path().join("checkpoints"))
    .await
    .expect("open store");
  (dir, store)
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_snapshot_reads_as_none() {
  let (_dir, s) = store().await;
  let key = CheckpointKey::new("account-refs", "nope");
  assert!(s.read_snapshot(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn snapshot_write_replaces_previous_value() {
  let (_dir, s) = store().await;
  let key = CheckpointKey::new("account-meta", "schema");

  s.write_snapshot(&key, json!({ "properties": { "a": { "string": 1 } } })).await.unwrap();
  s.write_snapshot(&key, json!({ "properties": {} })).await.unwrap();

  assert_eq!(s.read_snapshot(&key).await.unwrap(), Some(json!({ "properties": {} })));
  let path = s.snapshot_path(&key).unwrap();
  assert!(path.ends_with("account-meta/schema.json"));
  assert!(!path.with_extension("json.tmp").exists());
}

#[tokio::test]
async fn unified_record_lands_at_namespaced_path() {
  let (_dir, s) = store().await;
  let record = UnifiedRecord::from_source(SourceRecord::new("42", "a@x.com", "alice"));
  save_snapshot(&s, &record).await.unwrap();

  let raw = std::fs::read_to_string(s.root().join("account-refs/42.json")).unwrap();
  let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
  assert_eq!(value["login"], "alice@emailnotprovided.local");
  assert_eq!(value["sourceIds"], json!(["42"]));

  let loaded: Option<UnifiedRecord> =
    load_snapshot(&s, &UnifiedRecord::key_for("42")).await.unwrap();
  assert_eq!(loaded, Some(record));
}

#[tokio::test]
async fn corrupt_snapshot_is_an_error() {
  let (_dir, s) = store().await;
  let key = CheckpointKey::new("account-refs", "7");
  let path = s.snapshot_path(&key).unwrap();
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(&path, b"{ not json").unwrap();

  let err = s.read_snapshot(&key).await.unwrap_err();
  assert!(matches!(err, Error::Corrupt { .. }));
}

#[tokio::test]
async fn names_cannot_escape_the_root() {
  let (_dir, s) = store().await;
  for key in [
    CheckpointKey::new("..", "x"),
    CheckpointKey::new("account-refs", "../x"),
    CheckpointKey::new("account-refs", ""),
    CheckpointKey::new("a//b", "x"),
  ] {
    let err = s.write_snapshot(&key, json!({})).await.unwrap_err();
    assert!(matches!(err, Error::InvalidName(_)), "{key}");
  }
  assert!(s.append_log("../processed", &["1".into()]).await.is_err());
}

// ─── Logs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_log_reads_as_empty() {
  let (_dir, s) = store().await;
  assert!(s.read_log("account-meta/processed-accounts").await.unwrap().is_empty());
}

#[tokio::test]
async fn appends_keep_existing_entries() {
  let (_dir, s) = store().await;
  let name = "account-meta/processed-accounts";
  s.append_log(name, &["1".into(), "2".into()]).await.unwrap();
  s.append_log(name, &["3".into()]).await.unwrap();

  assert_eq!(s.read_log(name).await.unwrap(), ["1", "2", "3"]);
  let raw = std::fs::read_to_string(s.log_path(name).unwrap()).unwrap();
  assert_eq!(raw, "1\n2\n3\n");
}

#[tokio::test]
async fn torn_trailing_entry_is_ignored() {
  let (_dir, s) = store().await;
  let name = "account-meta/discard-accounts";
  s.append_log(name, &["1".into(), "2".into()]).await.unwrap();

  let path = s.log_path(name).unwrap();
  let mut raw = std::fs::read_to_string(&path).unwrap();
  raw.push_str("3-partial");
  std::fs::write(&path, raw).unwrap();

  assert_eq!(s.read_log(name).await.unwrap(), ["1", "2"]);
}

#[tokio::test]
async fn log_checkpoint_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  {
    let s = FsCheckpointStore::open(dir.path()).await.unwrap();
    let mut log = LogCheckpoint::new("account-meta/converted-logins");
    log.add("9");
    log.add("10");
    log.save(&s).await.unwrap();
  }

  let s = FsCheckpointStore::open(dir.path()).await.unwrap();
  let log = LogCheckpoint::new("account-meta/converted-logins");
  assert_eq!(log.read(&s).await.unwrap(), ["9", "10"]);
}
