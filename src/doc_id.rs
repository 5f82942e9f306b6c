use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A document identifier: a random (version 4) UUID assigned at ingest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied identifier.
    ///
    /// Only the hyphenated version 4 form is accepted; anything else is
    /// rejected as invalid input before it reaches the index.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.len() != 36 {
            return Err(Error::invalid(format!("malformed document id: {s:?}")));
        }
        let uuid = Uuid::parse_str(trimmed).map_err(|_| {
            Error::invalid(format!("malformed document id: {s:?}"))
        })?;
        if uuid.get_version_num() != 4
            || uuid.get_variant() != uuid::Variant::RFC4122
        {
            return Err(Error::invalid(format!(
                "document id must be a version 4 UUID: {s:?}"
            )));
        }
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The first 8 hex characters, for human display.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
