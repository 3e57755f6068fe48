//! On-disk shapes of export files.

use ferry_core::record::{LinkEdge, RecordStatus, SourceRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// `accounts/<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFile {
  /// Must match the file stem when present.
  #[serde(default)]
  pub id:          Option<String>,
  pub email:       String,
  #[serde(default)]
  pub username:    String,
  #[serde(default)]
  pub status:      RecordStatus,
  #[serde(default)]
  pub given_name:  Option<String>,
  #[serde(default)]
  pub surname:     Option<String>,
  #[serde(default)]
  pub custom_data: Map<String, Value>,
}

impl AccountFile {
  /// The record stored as `<stem>.json`. The file stem is the record id, so
  /// the resume skip set can be checked against file names alone.
  pub fn into_record(self, stem: &str) -> Result<SourceRecord> {
    if let Some(id) = self.id.as_deref()
      && id != stem
    {
      return Err(Error::IdMismatch { stem: stem.to_owned(), id: id.to_owned() });
    }
    Ok(SourceRecord {
      id:         stem.to_owned(),
      email:      self.email,
      login:      self.username,
      status:     self.status,
      given_name: self.given_name,
      surname:    self.surname,
      attributes: self.custom_data,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
  pub id: String,
}

/// `accountLinks/<id>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLinkFile {
  pub left_account:  AccountRef,
  pub right_account: AccountRef,
}

impl From<AccountLinkFile> for LinkEdge {
  fn from(link: AccountLinkFile) -> Self {
    LinkEdge::new(link.left_account.id, link.right_account.id)
  }
}
