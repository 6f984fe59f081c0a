//! Stored entries and the bookkeeping needed to evaluate their policy

use crate::cache::invalidation::InvalidationReason;
use crate::cache::policy::ExpirationPolicy;
use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// A value held by the memory store together with its policy
#[derive(Debug)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value (payload or null sentinel)
    pub value: CacheValue,

    /// Policy the entry was stored with
    pub policy: ExpirationPolicy,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create an entry, resolving time-based policies against the current time
    pub fn new(key: CacheKey, value: CacheValue, policy: ExpirationPolicy) -> Self {
        let now = Utc::now();
        let (expires_at, watched_modified) = match &policy {
            ExpirationPolicy::None => (None, None),
            ExpirationPolicy::Absolute(at) => (Some(*at), None),
            ExpirationPolicy::Relative(ttl) => (deadline(now, *ttl), None),
            ExpirationPolicy::FileChange(path) => (None, modified_time(path)),
        };

        Self {
            key,
            value,
            policy,
            metadata: CacheMetadata {
                created_at: now,
                expires_at,
                watched_modified,
                access_count: AtomicU64::new(0),
                last_access: AtomicU64::new(0),
            },
        }
    }

    /// Shift a relative expiry by a (possibly negative) number of seconds
    pub fn with_jitter(mut self, offset_secs: f64) -> Self {
        if let (ExpirationPolicy::Relative(_), Some(expires_at)) =
            (&self.policy, self.metadata.expires_at)
        {
            let offset = chrono::Duration::milliseconds((offset_secs * 1000.0) as i64);
            self.metadata.expires_at = expires_at
                .checked_add_signed(offset)
                .or(Some(expires_at));
        }
        self
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.metadata
            .expires_at
            .map_or(false, |expires_at| Utc::now() > expires_at)
    }

    /// Why this entry should no longer be served, if it shouldn't
    pub fn invalidation(&self) -> Option<InvalidationReason> {
        if self.is_expired() {
            return Some(InvalidationReason::Expired);
        }

        if let ExpirationPolicy::FileChange(path) = &self.policy {
            if modified_time(path) != self.metadata.watched_modified {
                return Some(InvalidationReason::SourceChanged {
                    path: path.display().to_string(),
                });
            }
        }

        None
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let expires_at = self.metadata.expires_at?;
        (expires_at - Utc::now()).to_std().ok()
    }

    /// Record a read at store tick `tick`
    ///
    /// Only needs a shared reference, so hits can be served under a read lock.
    pub fn mark_accessed(&self, tick: u64) {
        self.metadata.access_count.fetch_add(1, Ordering::Relaxed);
        self.metadata.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    /// Store tick of the most recent insertion or read (for LRU eviction)
    pub fn last_access(&self) -> u64 {
        self.metadata.last_access.load(Ordering::Relaxed)
    }

    /// Number of reads served from this entry
    pub fn access_count(&self) -> u64 {
        self.metadata.access_count.load(Ordering::Relaxed)
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When the entry expires, for time-based policies
    pub expires_at: Option<DateTime<Utc>>,

    /// Modification time of the watched file when the entry was stored
    pub watched_modified: Option<SystemTime>,

    /// Number of times this entry has been accessed
    access_count: AtomicU64,

    /// Store tick of the last access (for LRU tracking)
    last_access: AtomicU64,
}

// Durations too large to represent never expire.
fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

// A missing or unreadable file reads as `None`, so creation and deletion both
// count as a change.
fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
