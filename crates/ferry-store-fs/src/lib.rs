//! Filesystem backend for Ferry checkpoints.
//!
//! Structured snapshots are one JSON file each at
//! `<root>/<namespace>/<id>.json`, replaced atomically through a temporary
//! file. Completion logs are append-only text files at `<root>/<name>.txt`,
//! one id per line.

mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::FsCheckpointStore;

#[cfg(test)]
mod tests;
