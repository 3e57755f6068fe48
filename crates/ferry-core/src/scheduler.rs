//! [`RateAwareScheduler`]: dispatch throttling driven by response metadata.
//!
//! Every outbound call holds a [`ConcurrencyPool`] slot. When the call
//! settles, the slot is not released right away; it is parked for a delay
//! computed from the remote rate window. Once the remaining quota drops near
//! the concurrency ceiling, every finished call parks its slot until the
//! window resets, so the pool itself stops new dispatch. No retry loop, no
//! explicit sleep on the caller's path.

use std::{
  future::Future,
  sync::atomic::{AtomicBool, AtomicU64, Ordering},
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::concurrency::{ConcurrencyPool, PoolClosed};

// ─── Rate window ─────────────────────────────────────────────────────────────

/// The remote quota state reported alongside a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
  /// The server's clock when it produced the response.
  pub server_time: DateTime<Utc>,
  /// Calls still allowed in the current window.
  pub remaining:   u64,
  /// When the current window resets.
  pub reset_at:    DateTime<Utc>,
  /// The window's total quota, when reported.
  pub limit:       Option<u64>,
}

/// Anything that may carry a [`RateWindow`]: successful responses and
/// failures alike.
pub trait RateLimited {
  fn rate_window(&self) -> Option<RateWindow>;
}

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Knobs for the release-delay computation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RatePolicy {
  /// Maximum simultaneous in-flight calls.
  pub concurrency:     usize,
  /// Extra headroom above `concurrency` before throttling starts.
  pub safety_margin:   u64,
  /// Added to the time-until-reset to absorb clock skew.
  pub reset_buffer_ms: u64,
}

impl Default for RatePolicy {
  fn default() -> Self {
    Self { concurrency: 70, safety_margin: 10, reset_buffer_ms: 1000 }
  }
}

impl RatePolicy {
  /// How long a finished call must hold its slot.
  ///
  /// Calls that have already been dispatched may still consume quota, so the
  /// remaining count has to stay above the concurrency ceiling plus a margin.
  pub fn release_delay(&self, window: &RateWindow) -> Duration {
    if window.remaining > self.concurrency as u64 + self.safety_margin {
      return Duration::ZERO;
    }
    let until_reset = window.reset_at - window.server_time;
    let millis = until_reset.num_milliseconds() + self.reset_buffer_ms as i64;
    Duration::from_millis(millis.max(0) as u64)
  }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Wraps every outbound call with slot acquisition and delayed release.
#[derive(Debug)]
pub struct RateAwareScheduler {
  pool:            ConcurrencyPool,
  policy:          RatePolicy,
  next_request_id: AtomicU64,
  throttled:       AtomicBool,
}

impl RateAwareScheduler {
  pub fn new(policy: RatePolicy) -> Self {
    Self {
      pool: ConcurrencyPool::new(policy.concurrency),
      policy,
      next_request_id: AtomicU64::new(0),
      throttled: AtomicBool::new(false),
    }
  }

  pub fn policy(&self) -> &RatePolicy { &self.policy }

  pub fn pool(&self) -> &ConcurrencyPool { &self.pool }

  /// Stop dispatching. Calls already waiting for a slot fail with
  /// [`PoolClosed`].
  pub fn shutdown(&self) { self.pool.close(); }

  /// Run `call` once a slot is free, then park the slot according to the
  /// rate window of whatever the call returned. Errors are passed through
  /// unchanged after the release has been scheduled.
  pub async fn schedule<T, E, F, Fut>(&self, label: &str, call: F) -> Result<T, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: RateLimited,
    E: RateLimited + From<PoolClosed>,
  {
    let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(request_id, "scheduling {label}");
    let token = self.pool.acquire().await?;
    tracing::trace!(request_id, "executing {label}");

    let result = call().await;
    let window = match &result {
      Ok(res) => res.rate_window(),
      Err(err) => err.rate_window(),
    };
    let status = if result.is_ok() { "SUCCESS" } else { "FAILURE" };
    tracing::trace!(request_id, status, "finished {label}");

    let delay = window
      .as_ref()
      .map(|w| self.policy.release_delay(w))
      .unwrap_or_default();
    self.note_throttle(window.as_ref(), delay);
    token.release_after(delay);

    result
  }

  fn note_throttle(&self, window: Option<&RateWindow>, delay: Duration) {
    let throttled = !delay.is_zero();
    let was = self.throttled.swap(throttled, Ordering::Relaxed);
    match window {
      Some(w) if throttled && !was => tracing::warn!(
        remaining = w.remaining,
        limit = ?w.limit,
        "rate limit reached, parking request slots for {}ms",
        delay.as_millis()
      ),
      Some(w) if throttled => tracing::debug!(
        remaining = w.remaining,
        "rate limited, next slot in {}ms",
        delay.as_millis()
      ),
      _ => {}
    }
  }
}
