//! Capability keys agreed during a handshake.
//!
//! A connection that finished its handshake carries a set of these. The
//! registry only ever compares and hashes them; it never interprets the
//! name or the version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A (sub-protocol name, version) pair, e.g. `eth/66`.
///
/// Canonical text form is `name/version`. Serialized as that string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubProtocolIdentifier {
    name: String,
    version: u32,
}

impl SubProtocolIdentifier {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Sub-protocol name, e.g. `eth`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for SubProtocolIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCapabilityError {
    #[error("missing '/' separator in {0:?}")]
    MissingSeparator(String),
    #[error("empty sub-protocol name in {0:?}")]
    EmptyName(String),
    #[error("invalid version in {0:?}")]
    InvalidVersion(String),
}

impl FromStr for SubProtocolIdentifier {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the last '/' so names may themselves contain slashes.
        let (name, version) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseCapabilityError::MissingSeparator(s.to_string()))?;
        if name.is_empty() {
            return Err(ParseCapabilityError::EmptyName(s.to_string()));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| ParseCapabilityError::InvalidVersion(s.to_string()))?;
        Ok(Self::new(name, version))
    }
}

impl TryFrom<String> for SubProtocolIdentifier {
    type Error = ParseCapabilityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubProtocolIdentifier> for String {
    fn from(id: SubProtocolIdentifier) -> Self {
        id.to_string()
    }
}
