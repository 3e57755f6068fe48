//! Tests for `TargetClient` against an in-process mock of the target API.

use std::{collections::HashMap, sync::Arc};

use axum::{
  Json, Router,
  extract::{Path, Query, State},
  http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header::DATE},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use chrono::{TimeDelta, Utc};
use ferry_core::{
  attributes::MergeStrategy,
  checkpoint::MemoryCheckpointStore,
  config::MigrationConfig,
  migrate::{TargetWriter, WriteError, migrate_records},
  pipeline::{MemorySource, introspect},
  record::{LinkEdge, RecordStatus, SourceRecord},
  scheduler::RatePolicy,
  schema::{SchemaProperties, SchemaType},
  unified::UnifiedRecord,
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::CancellationToken;

use crate::{ClientConfig, Error, TargetClient, error::USER_LIMIT_REACHED};

// ─── Mock target ─────────────────────────────────────────────────────────────

struct Mock {
  users:          Vec<Value>,
  schema:         Value,
  max_users:      Option<usize>,
  fail_lookups:   bool,
  remaining:      u64,
  reset_in_secs:  i64,
  calls:          Vec<String>,
  schema_updates: Vec<Value>,
}

impl Default for Mock {
  fn default() -> Self {
    Self {
      users:          Vec::new(),
      schema:         json!({
        "definitions": {
          "base": { "properties": { "login": { "type": "string" } } },
          "custom": { "properties": { "age": { "type": "number" } } },
        }
      }),
      max_users:      None,
      fail_lookups:   false,
      remaining:      1000,
      reset_in_secs:  60,
      calls:          Vec::new(),
      schema_updates: Vec::new(),
    }
  }
}

type Shared = Arc<Mutex<Mock>>;

fn rate_headers(mock: &Mock) -> HeaderMap {
  let now = Utc::now();
  let reset = now + TimeDelta::seconds(mock.reset_in_secs);
  let mut headers = HeaderMap::new();
  headers.insert(DATE, HeaderValue::from_str(&now.to_rfc2822()).unwrap());
  headers.insert("x-rate-limit-remaining", HeaderValue::from(mock.remaining));
  headers.insert("x-rate-limit-reset", HeaderValue::from(reset.timestamp()));
  headers.insert("x-rate-limit-limit", HeaderValue::from(1000u64));
  headers
}

fn reply(mock: &Mock, status: StatusCode, body: Value) -> Response {
  (status, rate_headers(mock), Json(body)).into_response()
}

async fn list_users(
  State(state): State<Shared>,
  Query(params): Query<HashMap<String, String>>,
) -> Response {
  let mock = state.lock().await;
  if mock.fail_lookups {
    return reply(&mock, StatusCode::INTERNAL_SERVER_ERROR, json!({ "errorSummary": "boom" }));
  }
  // filter=profile.login eq "<login>"
  let login = params
    .get("filter")
    .and_then(|f| f.split('"').nth(1))
    .unwrap_or_default()
    .to_owned();
  let found: Vec<Value> = mock
    .users
    .iter()
    .filter(|u| u["profile"]["login"] == login.as_str())
    .cloned()
    .collect();
  reply(&mock, StatusCode::OK, json!(found))
}

async fn create_user(
  State(state): State<Shared>,
  method: Method,
  uri: Uri,
  Json(body): Json<Value>,
) -> Response {
  let mut mock = state.lock().await;
  mock.calls.push(format!("{method} {uri}"));
  if mock.max_users.is_some_and(|max| mock.users.len() >= max) {
    return reply(
      &mock,
      StatusCode::BAD_REQUEST,
      json!({
        "errorCode": "E0000001",
        "errorSummary": "Api validation failed: login",
        "errorCauses": [{ "errorSummary": USER_LIMIT_REACHED }],
      }),
    );
  }
  let user = json!({
    "id": uuid::Uuid::new_v4().to_string(),
    "status": "STAGED",
    "profile": body["profile"],
  });
  mock.users.push(user.clone());
  reply(&mock, StatusCode::OK, user)
}

async fn update_user(
  State(state): State<Shared>,
  Path(id): Path<String>,
  Json(body): Json<Value>,
) -> Response {
  let mut mock = state.lock().await;
  let Some(user) = mock.users.iter_mut().find(|u| u["id"] == id.as_str()) else {
    return reply(&mock, StatusCode::NOT_FOUND, json!({ "errorSummary": "Not found" }));
  };
  user["profile"] = body["profile"].clone();
  let user = user.clone();
  reply(&mock, StatusCode::OK, user)
}

async fn lifecycle(
  State(state): State<Shared>,
  Path((id, action)): Path<(String, String)>,
  method: Method,
  uri: Uri,
) -> Response {
  let mut mock = state.lock().await;
  mock.calls.push(format!("{method} {uri}"));
  let status = match action.as_str() {
    "activate" => "ACTIVE",
    "suspend" => "SUSPENDED",
    _ => return reply(&mock, StatusCode::BAD_REQUEST, json!({ "errorSummary": "bad action" })),
  };
  if let Some(user) = mock.users.iter_mut().find(|u| u["id"] == id.as_str()) {
    user["status"] = status.into();
  }
  // Lifecycle transitions answer with an empty body.
  (StatusCode::OK, rate_headers(&mock)).into_response()
}

async fn get_schema(State(state): State<Shared>) -> Response {
  let mock = state.lock().await;
  reply(&mock, StatusCode::OK, mock.schema.clone())
}

async fn update_schema(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
  let mut mock = state.lock().await;
  if let Some(added) = body["definitions"]["custom"]["properties"].as_object() {
    let custom = &mut mock.schema["definitions"]["custom"]["properties"];
    for (name, property) in added {
      custom[name] = property.clone();
    }
  }
  mock.schema_updates.push(body);
  reply(&mock, StatusCode::OK, mock.schema.clone())
}

async fn serve(mock: Mock) -> (String, Shared) {
  let state: Shared = Arc::new(Mutex::new(mock));
  let app = Router::new()
    .route("/api/v1/users", get(list_users).post(create_user))
    .route("/api/v1/users/{id}", post(update_user))
    .route("/api/v1/users/{id}/lifecycle/{action}", post(lifecycle))
    .route("/api/v1/meta/schemas/user/default", get(get_schema).post(update_schema))
    .with_state(state.clone());

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
  (format!("http://{address}"), state)
}

fn client(base_url: String) -> TargetClient {
  let config = ClientConfig {
    base_url,
    api_token: "test-token".into(),
    custom_data: MergeStrategy::Flatten,
  };
  let policy = RatePolicy { concurrency: 4, safety_margin: 1, reset_buffer_ms: 0 };
  TargetClient::new(config, policy).unwrap()
}

fn unified(id: &str, email: &str, login: &str) -> UnifiedRecord {
  UnifiedRecord::from_source(SourceRecord::new(id, email, login))
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn creates_and_activates_new_users() {
  let (url, state) = serve(Mock::default()).await;
  let client = client(url);

  let record = unified("1", "a@x.com", "a@x.com");
  let id = client.write_record(&record, &Default::default()).await.unwrap();

  let mock = state.lock().await;
  assert_eq!(mock.users.len(), 1);
  assert_eq!(mock.users[0]["id"], id.as_str());
  assert_eq!(mock.users[0]["status"], "ACTIVE");
  assert_eq!(mock.users[0]["profile"]["firstName"], "not_provided");
  assert_eq!(mock.calls, [
    "POST /api/v1/users?activate=false".to_string(),
    format!("POST /api/v1/users/{id}/lifecycle/activate?sendEmail=false"),
  ]);
}

#[tokio::test]
async fn existing_users_are_updated_in_place() {
  let mock = Mock {
    users: vec![json!({
      "id": "u1",
      "status": "ACTIVE",
      "profile": { "login": "a@x.com", "firstName": "not_provided" },
    })],
    ..Default::default()
  };
  let (url, state) = serve(mock).await;

  let mut source = SourceRecord::new("1", "a@x.com", "a@x.com");
  source.given_name = Some("Ada".into());
  let record = UnifiedRecord::from_source(source);
  let id = client(url).write_record(&record, &Default::default()).await.unwrap();

  assert_eq!(id, "u1");
  let mock = state.lock().await;
  assert_eq!(mock.users.len(), 1);
  assert_eq!(mock.users[0]["profile"]["firstName"], "Ada");
  assert!(mock.calls.is_empty(), "no create or activate: {:?}", mock.calls);
}

#[tokio::test]
async fn disabled_records_are_suspended() {
  let (url, state) = serve(Mock::default()).await;

  let mut record = unified("1", "d@x.com", "d@x.com");
  record.status = RecordStatus::Disabled;
  let id = client(url).write_record(&record, &Default::default()).await.unwrap();

  let mock = state.lock().await;
  assert_eq!(mock.users[0]["status"], "SUSPENDED");
  assert_eq!(
    mock.calls.last().unwrap(),
    &format!("POST /api/v1/users/{id}/lifecycle/suspend")
  );
}

#[tokio::test]
async fn full_target_is_capacity_exhaustion() {
  let (url, _state) = serve(Mock { max_users: Some(0), ..Default::default() }).await;

  let record = unified("1", "a@x.com", "a@x.com");
  let err = client(url).write_record(&record, &Default::default()).await.unwrap_err();
  assert!(matches!(err, WriteError::CapacityExhausted(ref m) if m.contains(USER_LIMIT_REACHED)));
}

#[tokio::test]
async fn other_failures_are_per_record() {
  let (url, _state) = serve(Mock { fail_lookups: true, ..Default::default() }).await;

  let record = unified("1", "a@x.com", "a@x.com");
  let err = client(url).write_record(&record, &Default::default()).await.unwrap_err();
  assert!(matches!(err, WriteError::Remote(_)));
  assert!(err.to_string().contains("boom"));
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn publishes_only_missing_properties() {
  let (url, state) = serve(Mock::default()).await;
  let client = client(url);

  let mut tallies = SchemaProperties::new();
  tallies.add("age", SchemaType::Number);
  tallies.add("nick", SchemaType::String);
  let schema = tallies.resolve();

  assert_eq!(client.add_custom_properties(&schema).await.unwrap(), ["nick"]);
  {
    let mock = state.lock().await;
    assert_eq!(mock.schema_updates.len(), 1);
    let custom = &mock.schema_updates[0]["definitions"]["custom"];
    assert_eq!(custom["id"], "#custom");
    assert_eq!(custom["properties"]["nick"]["type"], "string");
    assert!(custom["properties"].get("age").is_none());
  }

  // Already present now.
  assert!(client.add_custom_properties(&schema).await.unwrap().is_empty());
  assert_eq!(state.lock().await.schema_updates.len(), 1);
}

#[tokio::test]
async fn type_mismatch_blocks_publish() {
  let (url, state) = serve(Mock::default()).await;

  let mut tallies = SchemaProperties::new();
  tallies.add("age", SchemaType::String);
  tallies.add("nick", SchemaType::String);

  let err = client(url).add_custom_properties(&tallies.resolve()).await.unwrap_err();
  assert!(matches!(err, Error::SchemaMismatch { ref name, .. } if name == "age"));
  assert!(state.lock().await.schema_updates.is_empty());
}

// ─── Rate limiting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn ample_quota_releases_slots_immediately() {
  let (url, _state) = serve(Mock::default()).await;
  let client = client(url);

  let _: Value = client.get("/api/v1/meta/schemas/user/default", &[]).await.unwrap();
  assert_eq!(client.scheduler().pool().in_flight(), 0);
}

#[tokio::test]
async fn low_quota_parks_the_slot_until_reset() {
  let mock = Mock { remaining: 2, fail_lookups: true, ..Default::default() };
  let (url, _state) = serve(mock).await;
  let client = client(url);

  let _: Value = client.get("/api/v1/meta/schemas/user/default", &[]).await.unwrap();
  assert_eq!(client.scheduler().pool().in_flight(), 1);

  // Failed calls report the window too.
  let err = client.get::<Value>("/api/v1/users", &[]).await.unwrap_err();
  assert!(matches!(err, Error::Status { status: StatusCode::INTERNAL_SERVER_ERROR, .. }));
  assert_eq!(client.scheduler().pool().in_flight(), 2);
}

// ─── End to end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn migrates_introspected_accounts_once() {
  let (url, state) = serve(Mock::default()).await;
  let client = client(url);

  let records = vec![
    SourceRecord::new("1", "a@x.com", "a@x.com").with_attribute("nick", json!("ace")),
    SourceRecord::new("2", "a@x.com", "ada"),
    SourceRecord::new("3", "b@x.com", "bea"),
  ];
  let source = MemorySource::new(records, vec![LinkEdge::new("1", "2")]);
  let store = MemoryCheckpointStore::new();
  let config = MigrationConfig { concurrency_limit: 2, ..Default::default() };
  let cancel = CancellationToken::new();

  let mut unifier = introspect(&source, &store, &config, &cancel).await.unwrap().unifier;
  assert_eq!(unifier.len(), 2);

  let report = migrate_records(&mut unifier, &client, &store, &config, &cancel).await.unwrap();
  assert_eq!(report.written, 2);
  assert!(report.failures.is_empty());
  assert!(unifier.records().iter().all(|r| r.target_id.is_some()));
  {
    let mock = state.lock().await;
    assert_eq!(mock.users.len(), 2);
    assert_eq!(mock.schema["definitions"]["custom"]["properties"]["nick"]["type"], "string");
  }

  // A fresh run restores the target ids from the checkpoint and writes nothing.
  let mut unifier = introspect(&source, &store, &config, &cancel).await.unwrap().unifier;
  let report = migrate_records(&mut unifier, &client, &store, &config, &cancel).await.unwrap();
  assert_eq!(report.written, 0);
  assert_eq!(report.skipped, 2);
  assert_eq!(state.lock().await.users.len(), 2);
}
