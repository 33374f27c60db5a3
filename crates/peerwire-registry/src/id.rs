//! Connection identifiers and the allocator that mints them.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use peerwire_core::IdScheme;
use serde::Serialize;
use uuid::Uuid;

/// Registry-assigned identifier. Stable for the life of the entry and
/// never reused within one registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// Mints identifiers. Safe to share across threads; concurrent callers
/// never receive the same value.
#[derive(Debug)]
pub(crate) enum IdAllocator {
    Sequential(AtomicU64),
    Uuid,
}

impl IdAllocator {
    pub(crate) fn new(scheme: IdScheme) -> Self {
        match scheme {
            IdScheme::Sequential => Self::Sequential(AtomicU64::new(0)),
            IdScheme::Uuid => Self::Uuid,
        }
    }

    pub(crate) fn next(&self) -> ConnectionId {
        match self {
            Self::Sequential(counter) => {
                ConnectionId(counter.fetch_add(1, Ordering::Relaxed).to_string())
            }
            Self::Uuid => ConnectionId(Uuid::new_v4().to_string()),
        }
    }
}
