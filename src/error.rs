//! Error types for cache operations
//!
//! This module defines the error type shared by the key generator, the lock
//! registry, the cache-aside orchestrator and the bundled memory store.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The caller-supplied acquisition function failed; nothing was cached
    #[error("Acquisition failed for {key}: {source}")]
    AcquisitionError {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The backing store failed to serve a request
    #[error("Store error: {0}")]
    StoreError(String),

    /// A stored value does not have the type its key was generated for
    #[error("Type mismatch for {key}: expected {expected}")]
    TypeMismatchError { key: String, expected: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An explicit type tag name that cannot be embedded in a key
    #[error("Invalid type tag {0:?}: tags may not contain '[' or ']'")]
    InvalidTag(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Whether this error came from the acquisition function rather than the cache itself
    pub fn is_acquisition(&self) -> bool {
        matches!(self, CacheError::AcquisitionError { .. })
    }
}
