//! Typed references to build inputs and outputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an `ObjectUrl` points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UrlType {
  /// A path on the local file system.
  File,
  /// A logical location in the content store index.
  Content,
}

impl UrlType {
  fn scheme(self) -> &'static str {
    match self {
      UrlType::File => "file://",
      UrlType::Content => "content://",
    }
  }
}

/// A typed resource reference, e.g. `file://textures/grass.png` or `content://textures/grass`.
///
/// Serializes as its display string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectUrl {
  pub kind: UrlType,
  pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object url {0:?}: expected file://<path> or content://<path>")]
pub struct ParseUrlError(String);

impl ObjectUrl {
  pub fn new(kind: UrlType, path: impl Into<String>) -> Self {
    Self {
      kind,
      path: path.into(),
    }
  }

  pub fn file(path: impl Into<String>) -> Self {
    Self::new(UrlType::File, path)
  }

  pub fn content(path: impl Into<String>) -> Self {
    Self::new(UrlType::Content, path)
  }
}

impl fmt::Display for ObjectUrl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.kind.scheme(), self.path)
  }
}

impl FromStr for ObjectUrl {
  type Err = ParseUrlError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    for kind in [UrlType::File, UrlType::Content] {
      if let Some(path) = s.strip_prefix(kind.scheme())
        && !path.is_empty()
      {
        return Ok(Self::new(kind, path));
      }
    }
    Err(ParseUrlError(s.to_string()))
  }
}

impl TryFrom<String> for ObjectUrl {
  type Error = ParseUrlError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ObjectUrl> for String {
  fn from(url: ObjectUrl) -> Self {
    url.to_string()
  }
}
