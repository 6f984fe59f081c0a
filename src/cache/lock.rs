//! Per-key mutual exclusion shared by blocking and async callers
//!
//! [`KeyedLocks`] maps a key to a single-permit [`tokio::sync::Mutex`]. Both
//! [`KeyedLocks::acquire`] (blocks the calling thread) and
//! [`KeyedLocks::acquire_async`] (suspends the calling task) wait on that same
//! mutex, so a blocking caller and an async caller for one key exclude each
//! other.
//!
//! Locks are created on first use and never removed. Memory grows with the
//! number of distinct keys ever locked; in exchange a handle given to one
//! waiter can never be swapped out from under another.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type KeyLock = Arc<AsyncMutex<()>>;

static GLOBAL: OnceLock<Arc<KeyedLocks>> = OnceLock::new();

/// Registry of per-key locks
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, KeyLock>>,
}

/// Exclusive access to one key; released when dropped
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyLockGuard {
    key: String,
    _permit: OwnedMutexGuard<()>,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for KeyLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLockGuard").field("key", &self.key).finish()
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        debug!("Released lock: {}", self.key);
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, created on first use
    pub fn global() -> Arc<KeyedLocks> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(KeyedLocks::new())))
    }

    /// Lock name for a raw key inside a region
    pub fn unique_key(region: &str, key: &str) -> String {
        format!("[{}][{}]", region, key)
    }

    /// Block the current thread until `key` is free
    ///
    /// Prefer [`KeyedLocks::acquire_async`] from async code: waiting here ties
    /// up the runtime worker thread.
    pub fn acquire(&self, key: &str) -> KeyLockGuard {
        let lock = self.lock_for(key);
        // Unconstrained so an exhausted tokio coop budget can't stall the wait.
        let permit = futures::executor::block_on(tokio::task::unconstrained(lock.lock_owned()));
        debug!("Acquired lock (blocking): {}", key);
        KeyLockGuard {
            key: key.to_string(),
            _permit: permit,
        }
    }

    /// Suspend the current task until `key` is free
    ///
    /// Dropping the returned future before it completes leaves the lock untouched.
    pub async fn acquire_async(&self, key: &str) -> KeyLockGuard {
        let lock = self.lock_for(key);
        let permit = lock.lock_owned().await;
        debug!("Acquired lock (async): {}", key);
        KeyLockGuard {
            key: key.to_string(),
            _permit: permit,
        }
    }

    /// Blocking lock on `key` within `region`
    pub fn acquire_in(&self, region: &str, key: &str) -> KeyLockGuard {
        self.acquire(&Self::unique_key(region, key))
    }

    /// Async lock on `key` within `region`
    pub async fn acquire_in_async(&self, region: &str, key: &str) -> KeyLockGuard {
        self.acquire_async(&Self::unique_key(region, key)).await
    }

    /// Number of keys that have ever been locked
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Create-or-fetch, atomic under the table mutex
    fn lock_for(&self, key: &str) -> KeyLock {
        let mut locks = self.table();
        if let Some(lock) = locks.get(key) {
            return Arc::clone(lock);
        }
        debug!("Creating lock: {}", key);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    // The table is only touched by map operations that leave it consistent,
    // so a poisoned mutex is still safe to use.
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, KeyLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("keys", &self.len())
            .finish()
    }
}
