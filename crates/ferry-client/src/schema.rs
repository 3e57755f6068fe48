//! Publishing custom profile properties.

use ferry_core::schema::{PropertyDefinition, ResolvedSchema};
use serde_json::{Map, Value, json};

use crate::{Error, Result, TargetClient};

pub(crate) const SCHEMA_PATH: &str = "/api/v1/meta/schemas/user/default";

/// Base and custom properties already defined on the target.
fn existing_properties(schema: &Value) -> Map<String, Value> {
  let mut all = Map::new();
  for section in ["base", "custom"] {
    if let Some(props) = schema["definitions"][section]["properties"].as_object() {
      all.extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
  }
  all
}

/// Fails if `wanted` would change the type of an existing property.
fn check_compatible(name: &str, existing: &Value, wanted: &PropertyDefinition) -> Result<()> {
  let existing_type = existing["type"].as_str().unwrap_or_default();
  if existing_type != wanted.kind {
    return Err(Error::SchemaMismatch {
      name:     name.to_owned(),
      existing: existing_type.to_owned(),
      wanted:   wanted.kind.clone(),
    });
  }
  if let Some(items) = &wanted.items {
    let existing_items = existing["items"]["type"].as_str().unwrap_or_default();
    if existing_items != items.kind {
      return Err(Error::SchemaMismatch {
        name:     name.to_owned(),
        existing: format!("{existing_items} array"),
        wanted:   format!("{} array", items.kind),
      });
    }
  }
  Ok(())
}

impl TargetClient {
  /// Add every property of `schema` the target does not have yet. Returns
  /// the names added.
  pub async fn add_custom_properties(&self, schema: &ResolvedSchema) -> Result<Vec<String>> {
    let current: Value = self.get(SCHEMA_PATH, &[]).await?;
    let existing = existing_properties(&current);

    let mut to_add = Map::new();
    for (name, definition) in &schema.properties {
      match existing.get(name) {
        Some(property) => check_compatible(name, property, definition)?,
        None => {
          to_add.insert(name.clone(), serde_json::to_value(definition).map_err(ferry_core::Error::from)?);
        }
      }
    }

    if to_add.is_empty() {
      tracing::info!("no new custom schema properties to add");
      return Ok(Vec::new());
    }

    let names: Vec<String> = to_add.keys().cloned().collect();
    let body = json!({
      "definitions": {
        "custom": {
          "id": "#custom",
          "type": "object",
          "properties": to_add,
          "required": [],
        }
      }
    });
    let _: Value = self.post(SCHEMA_PATH, &[], Some(&body)).await?;
    tracing::info!("added custom schema properties: {}", names.join(", "));
    Ok(names)
  }
}

#[cfg(test)]
mod tests {
  use ferry_core::schema::SchemaType;

  use super::*;

  #[test]
  fn collects_base_and_custom_properties() {
    let schema = json!({
      "definitions": {
        "base": { "properties": { "login": { "type": "string" } } },
        "custom": { "properties": { "age": { "type": "number" } } },
      }
    });
    let all = existing_properties(&schema);
    assert_eq!(all.len(), 2);
    assert!(all.contains_key("login"));
  }

  #[test]
  fn type_changes_are_refused() {
    let wanted = PropertyDefinition::new("age", SchemaType::String);
    let err = check_compatible("age", &json!({ "type": "number" }), &wanted).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));

    let wanted = PropertyDefinition::new("tags", SchemaType::ArrayNumber);
    let existing = json!({ "type": "array", "items": { "type": "string" } });
    assert!(check_compatible("tags", &existing, &wanted).is_err());

    let existing = json!({ "type": "array", "items": { "type": "number" } });
    assert!(check_compatible("tags", &existing, &wanted).is_ok());
  }
}
