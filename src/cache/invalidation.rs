//! Reasons an entry leaves the store, and the events reported for them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Absolute or relative expiry passed
    Expired,

    /// The watched file changed or disappeared
    SourceChanged { path: String },

    /// Removed by key
    Manual,

    /// Evicted by LRU policy
    LeastRecentlyUsed,

    /// Removed by a type-scoped clear
    TypeCleared { type_tag: String },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "expired"),
            InvalidationReason::SourceChanged { path } => {
                write!(f, "watched file changed: {}", path)
            }
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
            InvalidationReason::TypeCleared { type_tag } => {
                write!(f, "cleared by type: {}", type_tag)
            }
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}
