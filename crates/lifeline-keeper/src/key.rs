//! Identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A reference into the content store.
///
/// Store-specific canonical form is decided by
/// [`ContentClient::normalize_key`]. The registry compares keys by
/// [`ContentKey::canonical`], which needs no store.
///
/// [`ContentClient::normalize_key`]: crate::ContentClient::normalize_key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Wrap a key string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the key text
    pub fn into_string(self) -> String {
        self.0
    }

    /// Key without surrounding whitespace, scheme or gateway prefix, and
    /// trailing slashes: `http://host:8888/CHK@abc/` becomes `CHK@abc`.
    pub fn canonical(&self) -> ContentKey {
        let key = self.0.trim();
        let key = match key.find('@') {
            Some(at) if at > 3 => key.get(at - 3..).unwrap_or(key),
            _ => key,
        };
        Self::new(key.trim_end_matches('/'))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContentKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for ContentKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Registry id of a tracked document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u32);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(DocumentId)
    }
}
