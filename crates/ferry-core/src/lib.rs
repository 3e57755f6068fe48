//! Core types, traits and algorithms for the Ferry identity migration engine.
//!
//! This crate has no HTTP and no filesystem code. Checkpoint
//! storage, the source feed and the target system are reached through the
//! traits in [`checkpoint`], [`pipeline`] and [`migrate`]; the other crates in
//! the workspace implement them.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod attributes;
pub mod checkpoint;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod links;
pub mod migrate;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod schema;
pub mod unified;
pub mod unify;

pub use error::{Error, Result};
