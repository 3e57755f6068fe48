//! Source records and link edges: the raw input of a migration.
//!
//! A [`SourceRecord`] is one identity exactly as it appeared in the export.
//! It is never mutated after it is read; the unifier either folds it into a
//! [`UnifiedRecord`](crate::unified::UnifiedRecord) or discards it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable identifier of a source record within the export.
pub type RecordId = String;

/// The lifecycle status a source record carried in the export.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
  #[default]
  Enabled,
  Disabled,
  Unverified,
}

/// One raw identity from the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
  pub id:         RecordId,
  /// The identifying attribute; records that share it are the same person.
  pub email:      String,
  /// The login name, which may or may not look like an email address.
  pub login:      String,
  pub status:     RecordStatus,
  pub given_name: Option<String>,
  pub surname:    Option<String>,
  /// Arbitrary, untyped extension attributes.
  #[serde(default)]
  pub attributes: Map<String, Value>,
}

impl SourceRecord {
  /// Convenience constructor with names and attributes left empty.
  pub fn new(
    id: impl Into<RecordId>,
    email: impl Into<String>,
    login: impl Into<String>,
  ) -> Self {
    Self {
      id:         id.into(),
      email:      email.into(),
      login:      login.into(),
      status:     RecordStatus::default(),
      given_name: None,
      surname:    None,
      attributes: Map::new(),
    }
  }

  pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
    self.attributes.insert(key.into(), value);
    self
  }
}

/// An unordered pair of source record ids declared to be the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
  pub left:  RecordId,
  pub right: RecordId,
}

impl LinkEdge {
  pub fn new(left: impl Into<RecordId>, right: impl Into<RecordId>) -> Self {
    Self { left: left.into(), right: right.into() }
  }
}
