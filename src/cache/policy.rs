//! Expiration policies handed to the store alongside each value

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What makes a stored entry go away
///
/// The orchestrator passes the policy to [`CacheStore::set`](crate::cache::CacheStore::set)
/// untouched; interpreting it is the store's job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Kept until removed or evicted
    #[default]
    None,

    /// Expires at a fixed point in time
    Absolute(DateTime<Utc>),

    /// Expires a fixed duration after it was stored
    Relative(Duration),

    /// Dropped once the file at this path changes or disappears
    FileChange(PathBuf),
}

impl ExpirationPolicy {
    pub fn absolute(at: DateTime<Utc>) -> Self {
        ExpirationPolicy::Absolute(at)
    }

    pub fn relative(ttl: Duration) -> Self {
        ExpirationPolicy::Relative(ttl)
    }

    pub fn watch_file(path: impl Into<PathBuf>) -> Self {
        ExpirationPolicy::FileChange(path.into())
    }

    /// Whether this policy can expire an entry on its own
    pub fn is_none(&self) -> bool {
        matches!(self, ExpirationPolicy::None)
    }
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirationPolicy::None => write!(f, "none"),
            ExpirationPolicy::Absolute(at) => write!(f, "absolute:{}", at.to_rfc3339()),
            ExpirationPolicy::Relative(ttl) => write!(f, "relative:{:?}", ttl),
            ExpirationPolicy::FileChange(path) => write!(f, "file:{}", path.display()),
        }
    }
}
