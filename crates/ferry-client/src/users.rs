//! User writes: profile mapping and the create / update / suspend flow.

use ferry_core::{
  attributes::MergeStrategy,
  migrate::{TargetWriter, WriteError},
  record::RecordStatus,
  schema::ResolvedSchema,
  unified::UnifiedRecord,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{Result, TargetClient};

pub(crate) const USERS_PATH: &str = "/api/v1/users";
const NOT_PROVIDED: &str = "not_provided";
const SUSPENDED: &str = "SUSPENDED";

#[derive(Debug, Deserialize)]
pub(crate) struct User {
  pub id:     String,
  #[serde(default)]
  pub status: String,
}

/// The target profile for `record`: login, email, names (defaulting to
/// `not_provided`), and every extension attribute whose type agrees with
/// `schema`.
pub fn build_profile(
  record: &UnifiedRecord,
  schema: &ResolvedSchema,
  strategy: MergeStrategy,
) -> ferry_core::Result<Map<String, Value>> {
  let mut profile = Map::new();
  for (name, typed) in record.typed_attributes(strategy)? {
    match schema.type_of(&name) {
      Some(ty) if ty == typed.ty => {
        profile.insert(name, typed.value);
      }
      Some(ty) => tracing::warn!(
        "account id={} property {name} is {} but the schema says {ty}, not migrating it",
        record.id,
        typed.ty
      ),
      None => tracing::warn!("account id={} property {name} is not in the schema", record.id),
    }
  }

  let name = |v: &Option<String>| {
    v.as_deref().filter(|s| !s.is_empty()).unwrap_or(NOT_PROVIDED).to_owned()
  };
  profile.insert("login".into(), record.login.clone().into());
  profile.insert("email".into(), record.email.clone().into());
  profile.insert("firstName".into(), name(&record.given_name).into());
  profile.insert("lastName".into(), name(&record.surname).into());
  Ok(profile)
}

/// Exact-match filter on the login. Quotes and backslashes in the login are
/// escaped so it stays a single string literal.
fn login_filter(login: &str) -> String {
  let escaped = login.replace('\\', "\\\\").replace('"', "\\\"");
  format!("profile.login eq \"{escaped}\"")
}

impl TargetClient {
  pub(crate) async fn find_user(&self, login: &str) -> Result<Option<User>> {
    let filter = login_filter(login);
    let users: Vec<User> = self.get(USERS_PATH, &[("filter", filter.as_str())]).await?;
    Ok(users.into_iter().next())
  }

  async fn update_user(&self, user: &User, profile: &Map<String, Value>) -> Result<User> {
    tracing::debug!("updating existing user id={} login={}", user.id, profile["login"]);
    let body = json!({ "profile": profile });
    let path = format!("{USERS_PATH}/{}", user.id);
    self.post(&path, &[], Some(&body)).await
  }

  async fn create_user(&self, profile: &Map<String, Value>) -> Result<User> {
    let body = json!({ "profile": profile });
    let user: User = self.post(USERS_PATH, &[("activate", "false")], Some(&body)).await?;
    let activate = format!("{USERS_PATH}/{}/lifecycle/activate", user.id);
    let _: Value = self.post(&activate, &[("sendEmail", "false")], None).await?;
    tracing::debug!("created and activated user id={} login={}", user.id, profile["login"]);
    Ok(user)
  }

  /// Suspension failures are logged, not returned: the user exists either
  /// way.
  async fn suspend_user(&self, id: &str) {
    let path = format!("{USERS_PATH}/{id}/lifecycle/suspend");
    match self.post::<Value>(&path, &[], None).await {
      Ok(_) => tracing::info!("suspended user id={id}"),
      Err(e) => tracing::error!("failed to suspend user id={id}: {e}"),
    }
  }
}

impl TargetWriter for TargetClient {
  async fn publish_schema(&self, schema: &ResolvedSchema) -> Result<(), WriteError> {
    self.add_custom_properties(schema).await?;
    Ok(())
  }

  async fn write_record(
    &self,
    record: &UnifiedRecord,
    schema: &ResolvedSchema,
  ) -> Result<String, WriteError> {
    let profile = build_profile(record, schema, self.custom_data()).map_err(WriteError::remote)?;

    let user = match self.find_user(&record.login).await? {
      Some(existing) => self.update_user(&existing, &profile).await?,
      None => self.create_user(&profile).await?,
    };

    if record.status == RecordStatus::Disabled && user.status != SUSPENDED {
      self.suspend_user(&user.id).await;
    }
    tracing::info!("migrated account id={} to user id={}", record.id, user.id);
    Ok(user.id)
  }
}

#[cfg(test)]
mod tests {
  use ferry_core::{
    record::SourceRecord,
    schema::{SchemaProperties, SchemaType},
  };

  use super::*;

  #[test]
  fn profile_keeps_only_schema_typed_attributes() {
    let mut source = SourceRecord::new("1", "a@x.com", "a@x.com")
      .with_attribute("age", json!(30))
      .with_attribute("nick", json!("ace"))
      .with_attribute("extra", json!(true));
    source.given_name = Some("Ada".into());
    let record = UnifiedRecord::from_source(source);

    let mut tallies = SchemaProperties::new();
    tallies.add("age", SchemaType::String);
    tallies.add("nick", SchemaType::String);
    let schema = tallies.resolve();

    let profile = build_profile(&record, &schema, MergeStrategy::Flatten).unwrap();
    assert_eq!(profile["nick"], "ace");
    assert!(profile.get("age").is_none());
    assert!(profile.get("extra").is_none());
    assert_eq!(profile["firstName"], "Ada");
    assert_eq!(profile["lastName"], NOT_PROVIDED);
    assert_eq!(profile["login"], "a@x.com");
  }

  #[test]
  fn excluded_custom_data_leaves_base_profile() {
    let record = UnifiedRecord::from_source(
      SourceRecord::new("1", "a@x.com", "al").with_attribute("nick", json!("ace")),
    );
    let profile =
      build_profile(&record, &ResolvedSchema::default(), MergeStrategy::Exclude).unwrap();
    assert_eq!(profile.len(), 4);
    assert_eq!(profile["login"], "al@emailnotprovided.local");
  }

  #[test]
  fn login_filter_escapes_quotes_and_backslashes() {
    assert_eq!(login_filter("a@x.com"), r#"profile.login eq "a@x.com""#);
    assert_eq!(
      login_filter(r#"x" or profile.login sw "a\"#),
      r#"profile.login eq "x\" or profile.login sw \"a\\""#
    );
  }
}
