//! [`AccountUnifier`]: merges linked source records into unified records.
//!
//! Decisions are made one record at a time, in whatever order records
//! arrive:
//!
//! 1. A record linked to an already-unified record with a different email is
//!    a conflict; it is discarded, never guessed at.
//! 2. A record sharing its email with an unlinked unified record is an
//!    ambiguous duplicate; it is discarded too.
//! 3. A record whose identity is already unified is merged into it.
//! 4. Anything else starts a new unified record.
//!
//! All state needed to resume lives in three completion logs and a handful
//! of structured snapshots; see [`AccountUnifier::save`] and
//! [`AccountUnifier::restore`].

use std::{
  collections::{BTreeMap, BTreeSet, HashMap, HashSet},
  fmt,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
  Error, Result,
  attributes::{MergeStrategy, TypedValue, typed_attributes},
  checkpoint::{
    CheckpointKey, CheckpointStore, LogCheckpoint, Snapshot, load_snapshot, restore_snapshot,
    save_snapshot,
  },
  concurrency::{each, map_to_object},
  links::LinkGraph,
  record::{RecordId, RecordStatus, SourceRecord},
  schema::{ResolvedSchema, SchemaProperties},
  unified::{UnifiedRecord, login_prefix},
};

pub const PROCESSED_LOG: &str = "account-meta/processed-accounts";
pub const DISCARD_LOG: &str = "account-meta/discard-accounts";
pub const CONVERTED_LOG: &str = "account-meta/converted-logins";

// ─── Diagnostics ─────────────────────────────────────────────────────────────

/// Two records that cannot be merged safely. Always needs an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
  /// Linked to an already-unified record whose email differs.
  LinkedEmailMismatch {
    record_id:    RecordId,
    email:        String,
    linked_id:    RecordId,
    linked_email: String,
  },
  /// Same email as a unified record it is not linked to.
  UnlinkedDuplicateEmail {
    record_id:   RecordId,
    email:       String,
    existing_id: RecordId,
  },
}

impl Conflict {
  /// The record that was discarded.
  pub fn record_id(&self) -> &str {
    match self {
      Self::LinkedEmailMismatch { record_id, .. } => record_id,
      Self::UnlinkedDuplicateEmail { record_id, .. } => record_id,
    }
  }

  /// Both sides of the conflict, discarded record first.
  pub fn involved(&self) -> [&str; 2] {
    match self {
      Self::LinkedEmailMismatch { record_id, linked_id, .. } => [record_id, linked_id],
      Self::UnlinkedDuplicateEmail { record_id, existing_id, .. } => [record_id, existing_id],
    }
  }
}

impl fmt::Display for Conflict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::LinkedEmailMismatch { record_id, email, linked_id, linked_email } => write!(
        f,
        "account id={record_id} email={email} is linked to id={linked_id} \
         email={linked_email}, but email is different"
      ),
      Self::UnlinkedDuplicateEmail { record_id, email, existing_id } => write!(
        f,
        "account id={record_id} email={email} has same email address as \
         id={existing_id}, but is not linked"
      ),
    }
  }
}

/// A converted login whose prefix is also another record's login prefix.
/// The converted user could no longer sign in with the bare prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCollision {
  pub id:             RecordId,
  pub login:          String,
  pub original_login: String,
  /// `(id, login)` of every other record sharing the prefix.
  pub conflicts:      Vec<(RecordId, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Unverified,
  AlreadyProcessed,
}

/// What the unifier did with one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
  Created { id: RecordId },
  Merged { id: RecordId, into: RecordId },
  Conflict(Conflict),
  Skipped { id: RecordId, reason: SkipReason },
}

/// Counters for the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnifyStats {
  pub restored:   usize,
  pub created:    usize,
  pub merged:     usize,
  pub conflicts:  usize,
  pub unverified: usize,
  pub duplicates: usize,
}

// ─── Conflict checkpoint ─────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedConflicts {
  #[serde(default)]
  pub conflicts: Vec<Conflict>,
}

struct ConflictReport(Vec<Conflict>);

impl Snapshot for ConflictReport {
  type Persisted = PersistedConflicts;

  fn checkpoint_key(&self) -> CheckpointKey { conflicts_key() }

  fn to_persisted(&self) -> PersistedConflicts { PersistedConflicts { conflicts: self.0.clone() } }

  fn from_persisted(p: PersistedConflicts) -> Self { Self(p.conflicts) }
}

fn conflicts_key() -> CheckpointKey { CheckpointKey::new("account-meta", "conflicts") }

fn schema_key() -> CheckpointKey { CheckpointKey::new("account-meta", "schema") }

// ─── Unifier ─────────────────────────────────────────────────────────────────

pub struct AccountUnifier {
  links:           LinkGraph,
  strategy:        MergeStrategy,
  records:         HashMap<RecordId, UnifiedRecord>,
  /// Source id → id of the unified record it was folded into.
  by_source:       HashMap<RecordId, RecordId>,
  by_email:        HashMap<String, RecordId>,
  login_prefixes:  HashMap<String, BTreeSet<RecordId>>,
  converted:       BTreeSet<RecordId>,
  /// Unified records changed since the last save.
  dirty:           BTreeSet<RecordId>,
  schema:          SchemaProperties,
  conflicts:       Vec<Conflict>,
  conflicts_dirty: bool,
  processed_log:   LogCheckpoint,
  discard_log:     LogCheckpoint,
  converted_log:   LogCheckpoint,
  stats:           UnifyStats,
}

impl AccountUnifier {
  pub fn new(links: LinkGraph, strategy: MergeStrategy) -> Self {
    Self {
      links,
      strategy,
      records: HashMap::new(),
      by_source: HashMap::new(),
      by_email: HashMap::new(),
      login_prefixes: HashMap::new(),
      converted: BTreeSet::new(),
      dirty: BTreeSet::new(),
      schema: SchemaProperties::new(),
      conflicts: Vec::new(),
      conflicts_dirty: false,
      processed_log: LogCheckpoint::new(PROCESSED_LOG),
      discard_log: LogCheckpoint::new(DISCARD_LOG),
      converted_log: LogCheckpoint::new(CONVERTED_LOG),
      stats: UnifyStats::default(),
    }
  }

  // ── Accessors ─────────────────────────────────────────────────────────────

  pub fn strategy(&self) -> MergeStrategy { self.strategy }

  pub fn stats(&self) -> UnifyStats { self.stats }

  pub fn conflicts(&self) -> &[Conflict] { &self.conflicts }

  pub fn get(&self, id: &str) -> Option<&UnifiedRecord> { self.records.get(id) }

  /// The unified record a source record ended up in, if any.
  pub fn record_for_source(&self, source_id: &str) -> Option<&UnifiedRecord> {
    self.by_source.get(source_id).and_then(|id| self.records.get(id))
  }

  /// All unified records, ordered by id.
  pub fn records(&self) -> Vec<&UnifiedRecord> {
    let ordered: BTreeMap<_, _> = self.records.iter().collect();
    ordered.into_values().collect()
  }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  pub fn resolve_schema(&self) -> ResolvedSchema { self.schema.resolve() }

  /// Record the target-system id for a unified record. The caller is
  /// responsible for checkpointing it.
  pub fn set_target_id(&mut self, id: &str, target_id: String) -> Option<&UnifiedRecord> {
    let record = self.records.get_mut(id)?;
    record.target_id = Some(target_id);
    Some(record)
  }

  // ── Unification ───────────────────────────────────────────────────────────

  /// Decide what to do with `record` and update in-memory state. Nothing
  /// reaches storage until [`save`](Self::save).
  ///
  /// Fails only if the record's attributes use a reserved name, in which
  /// case no state changes.
  pub fn add_record(&mut self, record: SourceRecord) -> Result<Decision> {
    if self.by_source.contains_key(&record.id) {
      tracing::debug!("account id={} already processed, skipping", record.id);
      self.stats.duplicates += 1;
      return Ok(Decision::Skipped { id: record.id, reason: SkipReason::AlreadyProcessed });
    }

    if record.status == RecordStatus::Unverified {
      tracing::debug!("skipping unverified account id={}", record.id);
      self.discard_log.add(record.id.clone());
      self.stats.unverified += 1;
      return Ok(Decision::Skipped { id: record.id, reason: SkipReason::Unverified });
    }

    if let Some(conflict) = self.linked_mismatch(&record) {
      return Ok(self.discard(conflict));
    }

    let typed = typed_attributes(&record.attributes, self.strategy)?;

    match self.by_email.get(&record.email).cloned() {
      Some(existing_id) => {
        let linked = self.records[&existing_id]
          .source_ids
          .iter()
          .any(|source| self.links.are_linked(source, &record.id));
        if !linked {
          return Ok(self.discard(Conflict::UnlinkedDuplicateEmail {
            record_id: record.id,
            email: record.email,
            existing_id,
          }));
        }
        Ok(self.merge_into(&existing_id, record, typed))
      }
      None => Ok(self.create(record, typed)),
    }
  }

  fn linked_mismatch(&self, record: &SourceRecord) -> Option<Conflict> {
    self
      .links
      .group(&record.id)
      .iter()
      .filter(|member| **member != record.id)
      .find_map(|member| {
        let linked = self.record_for_source(member)?;
        (linked.email != record.email).then(|| Conflict::LinkedEmailMismatch {
          record_id:    record.id.clone(),
          email:        record.email.clone(),
          linked_id:    member.clone(),
          linked_email: linked.email.clone(),
        })
      })
  }

  /// At most one conflict is kept per discarded record, so reprocessing a
  /// record after an interrupted save does not report it twice.
  fn discard(&mut self, conflict: Conflict) -> Decision {
    tracing::warn!("{conflict}. Skipping.");
    self.discard_log.add(conflict.record_id());
    self.stats.conflicts += 1;
    match self.conflicts.iter_mut().find(|c| c.record_id() == conflict.record_id()) {
      Some(existing) if *existing == conflict => {}
      Some(existing) => {
        *existing = conflict.clone();
        self.conflicts_dirty = true;
      }
      None => {
        self.conflicts.push(conflict.clone());
        self.conflicts_dirty = true;
      }
    }
    Decision::Conflict(conflict)
  }

  fn merge_into(
    &mut self,
    into: &str,
    record: SourceRecord,
    typed: BTreeMap<String, TypedValue>,
  ) -> Decision {
    let Some(unified) = self.records.get_mut(into) else {
      // by_email only ever points at known records.
      return self.create(record, typed);
    };
    let previous_login = unified.login.clone();
    if unified.merge(&record) {
      let new_login = unified.login.clone();
      tracing::info!(
        "account id={into} login={previous_login} replaced by login={new_login} from id={}",
        record.id
      );
      self.reindex_login(into, &previous_login, &new_login);
    }

    self.by_source.insert(record.id.clone(), into.to_owned());
    self.dirty.insert(into.to_owned());
    // Merged source ids are done; they never start a record of their own.
    self.discard_log.add(record.id.clone());
    self.tally(&record.id, &typed);
    self.stats.merged += 1;
    tracing::info!(
      "merged account id={} email={} into linked account id={into}",
      record.id,
      record.email
    );
    Decision::Merged { id: record.id, into: into.to_owned() }
  }

  fn create(&mut self, record: SourceRecord, typed: BTreeMap<String, TypedValue>) -> Decision {
    let unified = UnifiedRecord::from_source(record);
    let id = unified.id.clone();

    if let Some(original) = &unified.original_login {
      tracing::warn!(
        "account id={id} username={original} username is not an email. Using username={}.",
        unified.login
      );
      self.converted.insert(id.clone());
      self.converted_log.add(id.clone());
    }

    tracing::trace!("adding new account id={id}");
    self.index(unified);
    self.dirty.insert(id.clone());
    self.processed_log.add(id.clone());
    self.tally(&id, &typed);
    self.stats.created += 1;
    Decision::Created { id }
  }

  fn index(&mut self, unified: UnifiedRecord) {
    self.by_email.insert(unified.email.clone(), unified.id.clone());
    for source in &unified.source_ids {
      self.by_source.insert(source.clone(), unified.id.clone());
    }
    self
      .login_prefixes
      .entry(login_prefix(&unified.login).to_owned())
      .or_default()
      .insert(unified.id.clone());
    self.records.insert(unified.id.clone(), unified);
  }

  fn reindex_login(&mut self, id: &str, old: &str, new: &str) {
    if let Some(ids) = self.login_prefixes.get_mut(login_prefix(old)) {
      ids.remove(id);
    }
    self
      .login_prefixes
      .entry(login_prefix(new).to_owned())
      .or_default()
      .insert(id.to_owned());
  }

  fn tally(&mut self, source_id: &str, typed: &BTreeMap<String, TypedValue>) {
    let attributes = typed.iter().map(|(name, value)| (name.as_str(), value.ty));
    if !self.schema.add_record(source_id, attributes) && !typed.is_empty() {
      tracing::debug!("attributes of account id={source_id} already counted");
    }
  }

  /// Records whose converted login prefix collides with another record's
  /// login prefix. These need fixing before users are written.
  ///
  /// Only converted logins are checked. Two originally email-shaped logins
  /// with the same prefix on different domains are not reported.
  pub fn login_collisions(&self) -> Vec<LoginCollision> {
    let mut collisions = Vec::new();
    for id in &self.converted {
      let Some(record) = self.records.get(id) else { continue };
      let Some(original_login) = record.original_login.clone() else {
        continue;
      };
      let conflicts: Vec<(RecordId, String)> = self
        .login_prefixes
        .get(login_prefix(&record.login))
        .into_iter()
        .flatten()
        .filter(|other| *other != id)
        .filter_map(|other| {
          self.records.get(other).map(|r| (other.clone(), r.login.clone()))
        })
        .collect();
      if !conflicts.is_empty() {
        collisions.push(LoginCollision {
          id: id.clone(),
          login: record.login.clone(),
          original_login,
          conflicts,
        });
      }
    }
    collisions
  }

  // ── Checkpointing ─────────────────────────────────────────────────────────

  /// Persist everything changed since the last save. Unified record
  /// snapshots are written first, at most `limit` at a time, and the
  /// completion logs last, so a logged id always has its data on disk.
  ///
  /// If the logs fail after the schema and conflict snapshots were written,
  /// the affected records are processed again on the next run. Schema tallies
  /// remember which records they counted and conflicts are kept per record,
  /// so neither is counted twice.
  pub async fn save<S: CheckpointStore>(&mut self, store: &S, limit: usize) -> Result<()> {
    let ids = std::mem::take(&mut self.dirty);
    let pending: Vec<&UnifiedRecord> = ids.iter().filter_map(|id| self.records.get(id)).collect();
    let written = each(pending, limit, |record, _| save_snapshot(store, record)).await;
    if let Err(e) = written {
      self.dirty.extend(ids);
      return Err(e);
    }

    save_snapshot(store, &self.schema).await?;
    if self.conflicts_dirty {
      save_snapshot(store, &ConflictReport(self.conflicts.clone())).await?;
      self.conflicts_dirty = false;
    }

    self.discard_log.save(store).await?;
    self.converted_log.save(store).await?;
    self.processed_log.save(store).await?;
    Ok(())
  }

  /// Rebuild in-memory state from a previous run. Returns every source id
  /// that must not be processed again.
  ///
  /// An id in the processed log is skipped even when its snapshot is
  /// missing.
  pub async fn restore<S: CheckpointStore>(
    &mut self,
    store: &S,
    limit: usize,
  ) -> Result<HashSet<RecordId>> {
    let mut skip = HashSet::new();

    let processed = self.processed_log.read(store).await?;
    skip.extend(processed.iter().cloned());
    let restored = map_to_object(processed, limit, move |id| async move {
      let record: Option<UnifiedRecord> = load_snapshot(store, &UnifiedRecord::key_for(&id)).await?;
      if record.is_none() {
        tracing::warn!("account id={id} is marked processed but has no saved data");
      }
      Ok::<_, Error>(record.map(|r| (id, r)))
    })
    .await?;

    for (_, record) in restored {
      skip.extend(record.source_ids.iter().cloned());
      self.index(record);
      self.stats.restored += 1;
      if self.stats.restored % 10_000 == 0 {
        tracing::info!("loaded {} processed accounts", self.stats.restored);
      }
    }

    let discarded = Mutex::new(HashSet::new());
    let discarded_ref = &discarded;
    self
      .discard_log
      .process(store, limit, move |id| async move {
        discarded_ref.lock().await.insert(id);
        Ok(())
      })
      .await?;
    skip.extend(discarded.into_inner());

    if !skip.is_empty() {
      tracing::info!("found saved data for {} processed accounts", skip.len());
    }

    self.schema = restore_snapshot(store, &schema_key()).await?;
    let ConflictReport(conflicts) = restore_snapshot(store, &conflicts_key()).await?;
    self.conflicts = conflicts;

    for id in self.converted_log.read(store).await? {
      if self.records.contains_key(&id) {
        self.converted.insert(id);
      } else {
        tracing::warn!("converted login id={id} has no saved account data");
      }
    }

    Ok(skip)
  }
}
