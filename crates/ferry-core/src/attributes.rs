//! Extension-attribute strategies and value typing.
//!
//! Source attributes are arbitrary JSON. Before they can be tallied into the
//! schema or written to the target they are reshaped according to the
//! selected [`MergeStrategy`] and every value is assigned a [`SchemaType`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, schema::SchemaType};

/// Attribute names with this prefix are reserved for migrated credentials.
pub const RESERVED_PREFIX: &str = "stormpathApiKey_";

/// Flattened keys that describe the export itself rather than the person.
const SKIPPED_KEYS: [&str; 4] = ["createdAt", "modifiedAt", "href", "id"];

/// How extension attributes are carried into the target system.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MergeStrategy {
  /// Nested objects become `parent_child` keys.
  #[default]
  Flatten,
  /// The whole attribute object becomes a single `customData` string.
  Stringify,
  /// Extension attributes are dropped.
  Exclude,
}

/// A value coerced into one of the target's supported types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
  #[serde(rename = "type")]
  pub ty:    SchemaType,
  #[serde(rename = "val")]
  pub value: Value,
}

/// Reshape `raw` according to `strategy` and type every resulting value.
pub fn typed_attributes(
  raw: &Map<String, Value>,
  strategy: MergeStrategy,
) -> Result<BTreeMap<String, TypedValue>> {
  let mut out = BTreeMap::new();
  match strategy {
    MergeStrategy::Exclude => {}
    MergeStrategy::Stringify => {
      let encoded = Value::String(Value::Object(raw.clone()).to_string());
      out.insert("customData".to_owned(), transform(&encoded));
    }
    MergeStrategy::Flatten => {
      for (key, value) in flatten(raw) {
        if SKIPPED_KEYS.contains(&key.as_str()) {
          continue;
        }
        if key.starts_with(RESERVED_PREFIX) {
          return Err(Error::ReservedAttribute(key));
        }
        let typed = transform(&value);
        out.insert(key, typed);
      }
    }
  }
  Ok(out)
}

/// Flatten nested objects into `prefix_key` entries. Arrays are left intact.
pub fn flatten(raw: &Map<String, Value>) -> Map<String, Value> {
  let mut out = Map::new();
  flatten_into(raw, "", &mut out);
  out
}

fn flatten_into(raw: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
  for (key, value) in raw {
    let name = if prefix.is_empty() {
      key.clone()
    } else {
      format!("{prefix}_{key}")
    };
    match value {
      Value::Object(nested) => flatten_into(nested, &name, out),
      other => {
        out.insert(name, other.clone());
      }
    }
  }
}

/// Assign a schema type to `original`, coercing it where the target cannot
/// represent it directly.
pub fn transform(original: &Value) -> TypedValue {
  match original {
    Value::Array(items) => {
      let homogeneous = items
        .windows(2)
        .all(|w| std::mem::discriminant(&w[0]) == std::mem::discriminant(&w[1]));
      let numeric = homogeneous && items.first().is_some_and(Value::is_number);
      if numeric {
        TypedValue { ty: SchemaType::ArrayNumber, value: original.clone() }
      } else {
        let strings = items
          .iter()
          .map(|item| match item {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
          })
          .collect();
        TypedValue { ty: SchemaType::ArrayString, value: Value::Array(strings) }
      }
    }
    Value::Bool(_) => TypedValue { ty: SchemaType::Boolean, value: original.clone() },
    Value::Number(_) => TypedValue { ty: SchemaType::Number, value: original.clone() },
    Value::String(_) => TypedValue { ty: SchemaType::String, value: original.clone() },
    Value::Null | Value::Object(_) => TypedValue {
      ty:    SchemaType::String,
      value: Value::String(original.to_string()),
    },
  }
}

/// Whether a value counts as "not set" for first-non-empty-wins merging.
pub fn is_empty_value(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.is_empty(),
    Value::Array(a) => a.is_empty(),
    Value::Object(o) => o.is_empty(),
    Value::Bool(_) | Value::Number(_) => false,
  }
}
