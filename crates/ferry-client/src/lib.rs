//! HTTP client for the target identity API.
//!
//! Every request goes through a
//! [`RateAwareScheduler`](ferry_core::scheduler::RateAwareScheduler), which
//! reads the `x-rate-limit-*` response headers and throttles dispatch to the
//! remote quota. [`TargetClient`] implements
//! [`TargetWriter`](ferry_core::migrate::TargetWriter) for the write stage.

mod client;
mod rate;
mod schema;
mod users;

pub mod error;

pub use client::{ClientConfig, TargetClient};
pub use error::{Error, Result};
pub use rate::window_from_headers;
pub use users::build_profile;

#[cfg(test)]
mod tests;
