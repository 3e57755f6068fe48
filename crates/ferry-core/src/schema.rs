//! Incremental schema inference over extension attributes.
//!
//! Every observed attribute value contributes one vote for its type. Types are
//! only resolved at the end of introspection, by majority, so a property's
//! eventual type may change while records are still streaming in.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointKey, Snapshot};

// ─── Types ───────────────────────────────────────────────────────────────────

/// The value type of an extension attribute as the target system sees it.
///
/// Declaration order doubles as the tie-break order during resolution.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SchemaType {
  ArrayString,
  ArrayNumber,
  Boolean,
  Number,
  String,
}

/// Per-attribute type tallies, persisted as a structured checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaProperties {
  tallies: BTreeMap<String, BTreeMap<SchemaType, u64>>,
  /// Records whose attributes are already in `tallies`.
  counted: BTreeSet<String>,
}

impl SchemaProperties {
  pub fn new() -> Self { Self::default() }

  /// Record one observation of `name` with type `ty`.
  pub fn add(&mut self, name: &str, ty: SchemaType) {
    *self
      .tallies
      .entry(name.to_owned())
      .or_default()
      .entry(ty)
      .or_insert(0) += 1;
  }

  /// Record every attribute of one source record. A record that was already
  /// counted, possibly by an earlier run, adds nothing and returns `false`.
  pub fn add_record<'a>(
    &mut self,
    record_id: &str,
    attributes: impl IntoIterator<Item = (&'a str, SchemaType)>,
  ) -> bool {
    if self.counted.contains(record_id) {
      return false;
    }
    let mut any = false;
    for (name, ty) in attributes {
      self.add(name, ty);
      any = true;
    }
    if any {
      self.counted.insert(record_id.to_owned());
    }
    any
  }

  pub fn tally(&self, name: &str) -> Option<&BTreeMap<SchemaType, u64>> {
    self.tallies.get(name)
  }

  pub fn len(&self) -> usize { self.tallies.len() }

  pub fn is_empty(&self) -> bool { self.tallies.is_empty() }

  /// Pick one type per attribute by majority vote. Attributes observed with
  /// more than one type are reported in [`ResolvedSchema::conflicts`].
  pub fn resolve(&self) -> ResolvedSchema {
    let mut resolved = ResolvedSchema::default();

    for (name, counts) in &self.tallies {
      // Strictly-greater keeps the first type in declaration order on ties.
      let mut chosen: Option<(SchemaType, u64)> = None;
      for (&ty, &count) in counts {
        if chosen.is_none_or(|(_, best)| count > best) {
          chosen = Some((ty, count));
        }
      }
      let Some((ty, _)) = chosen else { continue };

      if counts.len() > 1 {
        let conflict = SchemaConflict {
          name:   name.clone(),
          counts: counts.iter().map(|(&t, &c)| (t, c)).collect(),
          chosen: ty,
        };
        tracing::warn!(
          "found multiple types for custom schema property '{name}' - {}. Using the most common: {ty}.",
          conflict.describe_counts(),
        );
        resolved.conflicts.push(conflict);
      }

      resolved.types.insert(name.clone(), ty);
      resolved
        .properties
        .insert(name.clone(), PropertyDefinition::new(name, ty));
    }

    resolved
  }
}

/// A property observed with more than one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConflict {
  pub name:   String,
  pub counts: Vec<(SchemaType, u64)>,
  pub chosen: SchemaType,
}

impl SchemaConflict {
  pub fn describe_counts(&self) -> String {
    self
      .counts
      .iter()
      .map(|(ty, count)| format!("{ty} ({count})"))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// The outcome of [`SchemaProperties::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedSchema {
  /// Attribute name → winning type.
  pub types:      BTreeMap<String, SchemaType>,
  /// Attribute name → target-system property definition.
  pub properties: BTreeMap<String, PropertyDefinition>,
  pub conflicts:  Vec<SchemaConflict>,
}

impl ResolvedSchema {
  pub fn type_of(&self, name: &str) -> Option<SchemaType> {
    self.types.get(name).copied()
  }
}

// ─── Target property definitions ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
  #[serde(rename = "type")]
  pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
  pub principal: String,
  pub action:    String,
}

/// A custom profile property as published to the target system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
  pub title:       String,
  pub description: String,
  #[serde(rename = "type")]
  pub kind:        String,
  pub required:    bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub items:       Option<ItemType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub union:       Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_length:  Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_length:  Option<u32>,
  pub permissions: Vec<Permission>,
}

impl PropertyDefinition {
  pub fn new(name: &str, ty: SchemaType) -> Self {
    let mut def = Self {
      title:       name.to_owned(),
      description: name.to_owned(),
      kind:        ty.to_string(),
      required:    false,
      items:       None,
      union:       None,
      min_length:  None,
      max_length:  None,
      permissions: vec![Permission {
        principal: "SELF".into(),
        action:    "READ_WRITE".into(),
      }],
    };
    match ty {
      SchemaType::ArrayString | SchemaType::ArrayNumber => {
        let item = if ty == SchemaType::ArrayString { "string" } else { "number" };
        def.kind = "array".into();
        def.items = Some(ItemType { kind: item.into() });
        def.union = Some("DISABLE".into());
      }
      SchemaType::String => {
        def.min_length = Some(1);
        def.max_length = Some(10_000);
      }
      SchemaType::Boolean | SchemaType::Number => {}
    }
    def
  }
}

// ─── Checkpoint ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedSchema {
  #[serde(default)]
  pub properties: BTreeMap<String, BTreeMap<SchemaType, u64>>,
  /// Source record ids already included in `properties`.
  #[serde(default)]
  pub counted:    BTreeSet<String>,
}

impl Snapshot for SchemaProperties {
  type Persisted = PersistedSchema;

  fn checkpoint_key(&self) -> CheckpointKey { CheckpointKey::new("account-meta", "schema") }

  fn to_persisted(&self) -> PersistedSchema {
    PersistedSchema { properties: self.tallies.clone(), counted: self.counted.clone() }
  }

  fn from_persisted(persisted: PersistedSchema) -> Self {
    Self { tallies: persisted.properties, counted: persisted.counted }
  }
}
