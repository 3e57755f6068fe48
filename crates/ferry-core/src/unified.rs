//! [`UnifiedRecord`]: one real-world identity assembled from linked source
//! records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  Result,
  attributes::{MergeStrategy, TypedValue, is_empty_value, typed_attributes},
  checkpoint::{CheckpointKey, Snapshot},
  record::{RecordId, RecordStatus, SourceRecord},
};

/// Namespace of unified-record snapshots.
pub const RECORD_NAMESPACE: &str = "account-refs";

/// Domain appended to logins that are not shaped like an email address.
pub const CONVERTED_LOGIN_DOMAIN: &str = "emailnotprovided.local";

/// Whether `login` already has the `local@domain` shape the target expects.
pub fn looks_like_email(login: &str) -> bool { login.contains('@') }

/// The part of a login before `@` (the whole login if there is none).
pub fn login_prefix(login: &str) -> &str {
  login.split_once('@').map_or(login, |(prefix, _)| prefix)
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRecord {
  /// The id of the first source record folded in; also the checkpoint id.
  pub id:             RecordId,
  pub email:          String,
  pub login:          String,
  /// The pre-normalization login, set only while `login` is a converted one.
  pub original_login: Option<String>,
  pub status:         RecordStatus,
  pub given_name:     Option<String>,
  pub surname:        Option<String>,
  /// Every source record merged into this one, in merge order.
  pub source_ids:     Vec<RecordId>,
  pub attributes:     Map<String, Value>,
  /// Set once the downstream writer has created the identity.
  pub target_id:      Option<String>,
}

impl UnifiedRecord {
  /// Start a unified record from its first source record, normalizing the
  /// login if it is not email-shaped. An empty login falls back to the
  /// email.
  pub fn from_source(record: SourceRecord) -> Self {
    let (login, original_login) = if record.login.is_empty() {
      (record.email.clone(), None)
    } else if looks_like_email(&record.login) {
      (record.login, None)
    } else {
      (format!("{}@{CONVERTED_LOGIN_DOMAIN}", record.login), Some(record.login))
    };

    Self {
      id: record.id.clone(),
      email: record.email,
      login,
      original_login,
      status: record.status,
      given_name: record.given_name,
      surname: record.surname,
      source_ids: vec![record.id],
      attributes: record.attributes,
      target_id: None,
    }
  }

  pub fn key_for(id: &str) -> CheckpointKey { CheckpointKey::new(RECORD_NAMESPACE, id) }

  pub fn login_converted(&self) -> bool { self.original_login.is_some() }

  /// Fold `other` in, first-non-empty-wins per field and per attribute.
  ///
  /// A converted login counts as empty: if `other` carries an email-shaped
  /// login it replaces the placeholder. Returns `true` when that happens.
  pub fn merge(&mut self, other: &SourceRecord) -> bool {
    let mut login_replaced = false;
    if self.login_converted() && looks_like_email(&other.login) {
      self.login = other.login.clone();
      self.original_login = None;
      login_replaced = true;
    }

    fill(&mut self.given_name, &other.given_name);
    fill(&mut self.surname, &other.surname);

    for (key, value) in &other.attributes {
      let missing = self.attributes.get(key).is_none_or(is_empty_value);
      if missing && !is_empty_value(value) {
        self.attributes.insert(key.clone(), value.clone());
      }
    }

    self.source_ids.push(other.id.clone());
    login_replaced
  }

  /// Attributes reshaped and typed for the target system.
  pub fn typed_attributes(&self, strategy: MergeStrategy) -> Result<BTreeMap<String, TypedValue>> {
    typed_attributes(&self.attributes, strategy)
  }
}

fn fill(slot: &mut Option<String>, other: &Option<String>) {
  if slot.as_deref().is_none_or(str::is_empty)
    && let Some(value) = other.as_deref().filter(|v| !v.is_empty())
  {
    *slot = Some(value.to_owned());
  }
}

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// The on-disk form of a [`UnifiedRecord`]: a flat object of exactly these
/// properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUnifiedRecord {
  pub id:             RecordId,
  pub email:          String,
  pub login:          String,
  #[serde(default)]
  pub original_login: Option<String>,
  #[serde(default)]
  pub status:         RecordStatus,
  #[serde(default)]
  pub given_name:     Option<String>,
  #[serde(default)]
  pub surname:        Option<String>,
  pub source_ids:     Vec<RecordId>,
  #[serde(default)]
  pub attributes:     Map<String, Value>,
  #[serde(default)]
  pub target_id:      Option<String>,
}

impl Snapshot for UnifiedRecord {
  type Persisted = PersistedUnifiedRecord;

  fn checkpoint_key(&self) -> CheckpointKey { Self::key_for(&self.id) }

  fn to_persisted(&self) -> PersistedUnifiedRecord {
    PersistedUnifiedRecord {
      id:             self.id.clone(),
      email:          self.email.clone(),
      login:          self.login.clone(),
      original_login: self.original_login.clone(),
      status:         self.status,
      given_name:     self.given_name.clone(),
      surname:        self.surname.clone(),
      source_ids:     self.source_ids.clone(),
      attributes:     self.attributes.clone(),
      target_id:      self.target_id.clone(),
    }
  }

  fn from_persisted(p: PersistedUnifiedRecord) -> Self {
    Self {
      id:             p.id,
      email:          p.email,
      login:          p.login,
      original_login: p.original_login,
      status:         p.status,
      given_name:     p.given_name,
      surname:        p.surname,
      source_ids:     p.source_ids,
      attributes:     p.attributes,
      target_id:      p.target_id,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn non_email_login_is_converted() {
    let unified = UnifiedRecord::from_source(SourceRecord::new("1", "s@example.com", "susan"));
    assert_eq!(unified.login, "susan@emailnotprovided.local");
    assert_eq!(unified.original_login.as_deref(), Some("susan"));
    assert_eq!(login_prefix(&unified.login), "susan");
  }

  #[test]
  fn empty_login_falls_back_to_email() {
    let unified = UnifiedRecord::from_source(SourceRecord::new("1", "s@example.com", ""));
    assert_eq!(unified.login, "s@example.com");
    assert!(!unified.login_converted());
  }

  #[test]
  fn merge_is_first_non_empty_wins() {
    let first = SourceRecord::new("1", "a@x.com", "a@x.com")
      .with_attribute("color", json!("red"))
      .with_attribute("nick", json!(""));
    let mut second = SourceRecord::new("2", "a@x.com", "a2")
      .with_attribute("color", json!("blue"))
      .with_attribute("nick", json!("ace"))
      .with_attribute("age", json!(40));
    second.given_name = Some("Ada".into());

    let mut unified = UnifiedRecord::from_source(first);
    assert!(!unified.merge(&second));

    assert_eq!(unified.login, "a@x.com");
    assert_eq!(unified.source_ids, ["1", "2"]);
    assert_eq!(unified.attributes["color"], "red");
    assert_eq!(unified.attributes["nick"], "ace");
    assert_eq!(unified.attributes["age"], 40);
    assert_eq!(unified.given_name.as_deref(), Some("Ada"));
  }

  #[test]
  fn email_login_replaces_converted_placeholder() {
    let mut unified = UnifiedRecord::from_source(SourceRecord::new("2", "a@x.com", "a2"));
    assert!(unified.login_converted());

    assert!(unified.merge(&SourceRecord::new("1", "a@x.com", "a@x.com")));
    assert_eq!(unified.login, "a@x.com");
    assert!(!unified.login_converted());
  }

  #[test]
  fn persisted_form_is_flat_camel_case() {
    let mut unified = UnifiedRecord::from_source(SourceRecord::new("7", "b@x.com", "bee"));
    unified.target_id = Some("00u1".into());

    let json = serde_json::to_value(unified.to_persisted()).unwrap();
    assert_eq!(json["sourceIds"], json!(["7"]));
    assert_eq!(json["originalLogin"], "bee");
    assert_eq!(json["targetId"], "00u1");
    assert_eq!(unified.checkpoint_key().to_string(), "account-refs/7");

    let back: PersistedUnifiedRecord = serde_json::from_value(json).unwrap();
    assert_eq!(UnifiedRecord::from_persisted(back), unified);
  }
}
