//! Reads a directory export of source identities.
//!
//! ```text
//! <root>/accounts/<id>.json       one account per file
//! <root>/accountLinks/<id>.json   one link edge per file
//! ```
//!
//! [`ExportDir`] implements [`RecordSource`](ferry_core::pipeline::RecordSource),
//! so it plugs straight into introspection.

mod model;
mod source;

pub mod error;

pub use error::{Error, Result};
pub use model::{AccountFile, AccountLinkFile, AccountRef};
pub use source::ExportDir;
