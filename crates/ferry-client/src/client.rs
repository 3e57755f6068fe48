//! [`TargetClient`]: rate-aware JSON client for the target API.

use std::{sync::Arc, time::Duration};

use ferry_core::{
  attributes::MergeStrategy,
  scheduler::{RateAwareScheduler, RateLimited, RatePolicy, RateWindow},
};
use reqwest::{
  Client, Method,
  header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result, rate::window_from_headers};

/// Connection settings for the target API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub base_url:    String,
  pub api_token:   String,
  /// How extension attributes were shaped during introspection.
  pub custom_data: MergeStrategy,
}

/// A successful response, body not yet decoded.
struct Reply {
  body:   String,
  window: Option<RateWindow>,
}

impl RateLimited for Reply {
  fn rate_window(&self) -> Option<RateWindow> { self.window.clone() }
}

/// Async client for the target API.
///
/// Cheap to clone; clones share the HTTP connection pool and the scheduler,
/// so every clone counts against the same concurrency ceiling.
#[derive(Debug, Clone)]
pub struct TargetClient {
  http:        Client,
  base_url:    String,
  scheduler:   Arc<RateAwareScheduler>,
  custom_data: MergeStrategy,
}

fn user_agent() -> String {
  format!(
    "ferry/{} {}/{}",
    env!("CARGO_PKG_VERSION"),
    std::env::consts::OS,
    std::env::consts::ARCH
  )
}

impl TargetClient {
  pub fn new(config: ClientConfig, policy: RatePolicy) -> Result<Self> {
    let mut headers = HeaderMap::new();
    let token = HeaderValue::from_str(&format!("SSWS {}", config.api_token))
      .map_err(|_| Error::Config("api token is not a valid header value".into()))?;
    headers.insert(AUTHORIZATION, token);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let http = Client::builder()
      .default_headers(headers)
      .user_agent(user_agent())
      .timeout(Duration::from_secs(60))
      .build()
      .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

    Ok(Self {
      http,
      base_url: config.base_url.trim_end_matches('/').to_owned(),
      scheduler: Arc::new(RateAwareScheduler::new(policy)),
      custom_data: config.custom_data,
    })
  }

  pub fn scheduler(&self) -> &RateAwareScheduler { &self.scheduler }

  pub fn custom_data(&self) -> MergeStrategy { self.custom_data }

  fn url(&self, path: &str) -> String { format!("{}{path}", self.base_url) }

  // ── Requests ──────────────────────────────────────────────────────────────

  pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
    self.request(Method::GET, path, query, None).await
  }

  pub async fn post<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, &str)],
    body: Option<&Value>,
  ) -> Result<T> {
    self.request(Method::POST, path, query, body).await
  }

  async fn request<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, &str)],
    body: Option<&Value>,
  ) -> Result<T> {
    let request = format!("{method} {path}");
    let reply = self.send(&request, method, path, query, body).await?;

    // Lifecycle calls answer with an empty body.
    let text = if reply.body.trim().is_empty() { "null" } else { reply.body.as_str() };
    serde_json::from_str(text).map_err(|source| Error::Decode { request, source })
  }

  async fn send(
    &self,
    request: &str,
    method: Method,
    path: &str,
    query: &[(&str, &str)],
    body: Option<&Value>,
  ) -> Result<Reply> {
    let mut builder = self.http.request(method, self.url(path)).query(query);
    if let Some(body) = body {
      builder = builder.json(body);
    }

    self
      .scheduler
      .schedule(request, move || async move {
        let transport = |source| Error::Transport { request: request.to_owned(), source };
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let window = window_from_headers(response.headers());
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
          return Err(Error::Status {
            request: request.to_owned(),
            status,
            summary: error_summary(&body),
            window,
          });
        }
        Ok(Reply { body, window })
      })
      .await
  }
}

/// The target's error summary plus every cause, or the raw body if it is not
/// a structured error.
fn error_summary(body: &str) -> String {
  let Ok(value) = serde_json::from_str::<Value>(body) else {
    return body.trim().to_owned();
  };
  let mut parts: Vec<&str> = Vec::new();
  if let Some(summary) = value["errorSummary"].as_str() {
    parts.push(summary);
  }
  if let Some(causes) = value["errorCauses"].as_array() {
    parts.extend(causes.iter().filter_map(|c| c["errorSummary"].as_str()));
  }
  if parts.is_empty() { body.trim().to_owned() } else { parts.join("; ") }
}
