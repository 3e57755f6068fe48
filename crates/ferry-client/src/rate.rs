//! Rate-limit headers → [`RateWindow`].

use chrono::{DateTime, Utc};
use ferry_core::scheduler::RateWindow;
use reqwest::header::{DATE, HeaderMap};

const REMAINING: &str = "x-rate-limit-remaining";
const RESET: &str = "x-rate-limit-reset";
const LIMIT: &str = "x-rate-limit-limit";

fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
  headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Read the quota state from response headers.
///
/// `x-rate-limit-reset` is in epoch seconds. The server clock comes from
/// `Date`; the local clock stands in when it is missing. Returns `None`
/// unless both the remaining count and the reset time are present.
pub fn window_from_headers(headers: &HeaderMap) -> Option<RateWindow> {
  let remaining = header::<u64>(headers, REMAINING)?;
  let reset_at = DateTime::from_timestamp(header::<i64>(headers, RESET)?, 0)?;
  let server_time = headers
    .get(DATE)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    .map_or_else(Utc::now, |d| d.with_timezone(&Utc));

  Some(RateWindow { server_time, remaining, reset_at, limit: header(headers, LIMIT) })
}
