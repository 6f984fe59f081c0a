//! Cache-aside orchestration with single-flight acquisition
//!
//! [`SingleFlightCache`] wraps a [`CacheStore`] and runs the caller's
//! acquisition function at most once per entry, however many callers miss at
//! the same time:
//!
//! 1. probe the store without locking (the common, cheap path);
//! 2. on a miss, take the per-key lock;
//! 3. probe again, since another caller may have filled the entry meanwhile;
//! 4. otherwise acquire, store the result (or the null sentinel) and return.
//!
//! Blocking (`get*`) and async (`get_async*`) callers share the same per-key
//! lock, so mixing them still acquires once.

use crate::cache::{
    invalidation::{InvalidationEvent, InvalidationReason},
    key::{self, TypeTag},
    lock::KeyedLocks,
    policy::ExpirationPolicy,
    sentinel,
    store::CacheStore,
    types::{CacheKey, CacheValue},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of looking a key up in the store
enum Probe<T> {
    /// Entry present; `None` when the null sentinel was cached
    Hit(Option<T>),
    Miss,
}

/// Single-flight cache-aside front for a [`CacheStore`]
pub struct SingleFlightCache<S> {
    store: S,
    locks: Arc<KeyedLocks>,
    acquisitions: AtomicU64,
}

impl<S: CacheStore> SingleFlightCache<S> {
    /// Wrap `store`, serialising acquisitions on the process-wide lock registry
    pub fn new(store: S) -> Self {
        Self::with_locks(store, KeyedLocks::global())
    }

    /// Wrap `store` with an explicitly provided lock registry
    ///
    /// Every cache front over the same store must share one registry, or
    /// acquisitions through different fronts are not serialised.
    pub fn with_locks(store: S, locks: Arc<KeyedLocks>) -> Self {
        info!("Initializing single-flight cache");
        Self {
            store,
            locks,
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    /// Number of times an acquisition function has been invoked
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Cached value for `key`, acquiring it on a miss. Never expires.
    ///
    /// Blocks the calling thread while another caller acquires the same
    /// entry. From async code use [`SingleFlightCache::get_async`].
    pub fn get<T, E, F>(&self, key: &str, acquire: F) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        self.get_with(key, ExpirationPolicy::None, acquire)
    }

    /// [`SingleFlightCache::get`] with an entry that expires at `at`
    pub fn get_until<T, E, F>(
        &self,
        key: &str,
        at: DateTime<Utc>,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        self.get_with(key, ExpirationPolicy::Absolute(at), acquire)
    }

    /// [`SingleFlightCache::get`] with an entry that expires `ttl` after it is stored
    pub fn get_for<T, E, F>(&self, key: &str, ttl: Duration, acquire: F) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        self.get_with(key, ExpirationPolicy::Relative(ttl), acquire)
    }

    /// [`SingleFlightCache::get`] with an entry dropped once `path` changes
    pub fn get_watching<T, E, F>(
        &self,
        key: &str,
        path: impl Into<PathBuf>,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        self.get_with(key, ExpirationPolicy::FileChange(path.into()), acquire)
    }

    /// Blocking get-or-acquire with an explicit policy
    pub fn get_with<T, E, F>(
        &self,
        key: &str,
        policy: ExpirationPolicy,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        self.get_tagged(&TypeTag::of::<T>(), key, policy, acquire)
    }

    /// Blocking get-or-acquire under an explicit type tag
    ///
    /// Entries written here are visible to the `*_tagged` operations with the
    /// same tag. Reading them back as a different `T` is a type mismatch.
    pub fn get_tagged<T, E, F>(
        &self,
        tag: &TypeTag,
        key: &str,
        policy: ExpirationPolicy,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        let cache_key = key::generate(tag, key);

        if let Probe::Hit(value) = self.probe::<T>(&cache_key)? {
            return Ok(value);
        }

        let _guard = self.locks.acquire(&cache_key);

        if let Probe::Hit(value) = self.probe::<T>(&cache_key)? {
            debug!("Filled while waiting: {}", cache_key);
            return Ok(value);
        }

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        debug!("Acquiring: {}", cache_key);
        let acquired = acquire().map_err(|e| acquisition_error(&cache_key, e))?;
        self.put(cache_key, acquired, policy)
    }

    /// Async counterpart of [`SingleFlightCache::get`]
    pub async fn get_async<T, E, F, Fut>(&self, key: &str, acquire: F) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.get_async_with(key, ExpirationPolicy::None, acquire)
            .await
    }

    /// Async counterpart of [`SingleFlightCache::get_until`]
    pub async fn get_async_until<T, E, F, Fut>(
        &self,
        key: &str,
        at: DateTime<Utc>,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.get_async_with(key, ExpirationPolicy::Absolute(at), acquire)
            .await
    }

    /// Async counterpart of [`SingleFlightCache::get_for`]
    pub async fn get_async_for<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.get_async_with(key, ExpirationPolicy::Relative(ttl), acquire)
            .await
    }

    /// Async counterpart of [`SingleFlightCache::get_watching`]
    pub async fn get_async_watching<T, E, F, Fut>(
        &self,
        key: &str,
        path: impl Into<PathBuf>,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.get_async_with(key, ExpirationPolicy::FileChange(path.into()), acquire)
            .await
    }

    /// Async get-or-acquire with an explicit policy
    ///
    /// Dropping the returned future (e.g. on timeout) stores nothing and
    /// releases the per-key lock.
    pub async fn get_async_with<T, E, F, Fut>(
        &self,
        key: &str,
        policy: ExpirationPolicy,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.get_async_tagged(&TypeTag::of::<T>(), key, policy, acquire)
            .await
    }

    /// Async counterpart of [`SingleFlightCache::get_tagged`]
    pub async fn get_async_tagged<T, E, F, Fut>(
        &self,
        tag: &TypeTag,
        key: &str,
        policy: ExpirationPolicy,
        acquire: F,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let cache_key = key::generate(tag, key);

        if let Probe::Hit(value) = self.probe::<T>(&cache_key)? {
            return Ok(value);
        }

        let _guard = self.locks.acquire_async(&cache_key).await;

        if let Probe::Hit(value) = self.probe::<T>(&cache_key)? {
            debug!("Filled while waiting: {}", cache_key);
            return Ok(value);
        }

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        debug!("Acquiring (async): {}", cache_key);
        let acquired = acquire()
            .await
            .map_err(|e| acquisition_error(&cache_key, e))?;
        self.put(cache_key, acquired, policy)
    }

    /// Whether an entry of type `T` is cached under `key`
    pub fn is_set<T: 'static>(&self, key: &str) -> Result<bool> {
        self.is_set_tagged(&TypeTag::of::<T>(), key)
    }

    pub fn is_set_tagged(&self, tag: &TypeTag, key: &str) -> Result<bool> {
        self.store.contains(&key::generate(tag, key))
    }

    /// Drop the entry of type `T` under `key`
    ///
    /// Takes no lock: an acquisition already in flight for this entry may
    /// store its result right after.
    pub fn remove<T: 'static>(&self, key: &str) -> Result<bool> {
        self.remove_tagged(&TypeTag::of::<T>(), key)
    }

    pub fn remove_tagged(&self, tag: &TypeTag, key: &str) -> Result<bool> {
        let cache_key = key::generate(tag, key);
        let removed = self.store.remove(&cache_key)?.is_some();
        debug!("Remove {}: {}", cache_key, removed);
        Ok(removed)
    }

    /// Drop every entry of type `T`, leaving other types untouched
    pub fn clear<T: 'static>(&self) -> Result<InvalidationEvent> {
        self.clear_tagged(&TypeTag::of::<T>())
    }

    pub fn clear_tagged(&self, tag: &TypeTag) -> Result<InvalidationEvent> {
        let mut removed = Vec::new();
        for cache_key in self.store.keys()? {
            if !key::is_generated_for(tag, &cache_key) {
                continue;
            }
            if self.store.remove(&cache_key)?.is_some() {
                removed.push(cache_key);
            }
        }

        info!("Cleared {} entries of type {}", removed.len(), tag);
        let reason = InvalidationReason::TypeCleared {
            type_tag: tag.to_string(),
        };
        Ok(InvalidationEvent::new(reason, removed))
    }

    fn probe<T: Clone + 'static>(&self, cache_key: &str) -> Result<Probe<T>> {
        match self.store.get(cache_key)? {
            Some(value) => {
                debug!("Cache hit: {}", cache_key);
                decode(cache_key, &value).map(Probe::Hit)
            }
            None => {
                debug!("Cache miss: {}", cache_key);
                Ok(Probe::Miss)
            }
        }
    }

    fn put<T: Clone + Send + Sync + 'static>(
        &self,
        cache_key: CacheKey,
        acquired: Option<T>,
        policy: ExpirationPolicy,
    ) -> Result<Option<T>> {
        let stored: CacheValue = match &acquired {
            Some(value) => Arc::new(value.clone()),
            None => {
                debug!("Caching absent result: {}", cache_key);
                sentinel::sentinel()
            }
        };

        self.store.set(cache_key, stored, policy)?;
        Ok(acquired)
    }
}

fn decode<T: Clone + 'static>(cache_key: &str, value: &CacheValue) -> Result<Option<T>> {
    if sentinel::is_sentinel(value) {
        return Ok(None);
    }

    value
        .downcast_ref::<T>()
        .cloned()
        .map(Some)
        .ok_or_else(|| CacheError::TypeMismatchError {
            key: cache_key.to_string(),
            expected: std::any::type_name::<T>().to_string(),
        })
}

fn acquisition_error<E: Into<anyhow::Error>>(cache_key: &str, error: E) -> CacheError {
    let source = error.into();
    warn!("Acquisition failed for {}: {}", cache_key, source);
    CacheError::AcquisitionError {
        key: cache_key.to_string(),
        source,
    }
}

impl<S> std::fmt::Debug for SingleFlightCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("locks", &self.locks)
            .field("acquisitions", &self.acquisitions.load(Ordering::Relaxed))
            .finish()
    }
}
