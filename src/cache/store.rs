//! Backing store contract and the bundled in-memory implementation

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    policy::ExpirationPolicy,
    types::{CacheKey, CacheStats, CacheValue},
};
use crate::error::{CacheError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capabilities the cache-aside layer needs from a key/value store
///
/// Implementations must be safe to call concurrently; the orchestrator adds no
/// synchronisation around these calls beyond its per-key locks.
pub trait CacheStore: Send + Sync {
    /// Stored value for `key`, or `None` if absent (or no longer valid)
    fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Store or overwrite `key`
    fn set(&self, key: CacheKey, value: CacheValue, policy: ExpirationPolicy) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool>;

    /// Remove `key`, returning the value it held
    fn remove(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Every key currently held
    fn keys(&self) -> Result<Vec<CacheKey>>;
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        (**self).get(key)
    }

    fn set(&self, key: CacheKey, value: CacheValue, policy: ExpirationPolicy) -> Result<()> {
        (**self).set(key, value, policy)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        (**self).contains(key)
    }

    fn remove(&self, key: &str) -> Result<Option<CacheValue>> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        (**self).keys()
    }
}

/// Thread-safe in-memory store with policy-driven expiry and LRU eviction
///
/// Expiration policies are evaluated lazily: an entry whose policy has fired
/// is dropped the next time it is read, or by [`MemoryStore::cleanup_expired`].
/// Hits are served under a shared read lock; recency is recorded on the entry
/// and the least recently used victim is only searched for when the store is
/// full.
pub struct MemoryStore {
    /// Store configuration
    pub(crate) config: CacheConfig,

    /// Internal storage
    inner: RwLock<StoreInner>,

    /// Monotonic access clock for LRU ordering
    clock: AtomicU64,

    hits: AtomicU64,
    misses: AtomicU64,
}

/// Internal cache storage
struct StoreInner {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// Eviction and invalidation counters (hits and misses live outside the lock)
    stats: CacheStats,
}

impl StoreInner {
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.stats.entries = self.entries.len();
        Some(entry)
    }

    fn least_recently_used(&self) -> Option<CacheKey> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access())
            .map(|(key, _)| key.clone())
    }
}

impl MemoryStore {
    /// Create a new store, rejecting an invalid configuration
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing memory store with config: {:?}", config);
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Policy an entry was stored with, if it is present
    pub fn policy_of(&self, key: &str) -> Result<Option<ExpirationPolicy>> {
        let inner = self.read()?;
        Ok(inner.entries.get(key).map(|entry| entry.policy.clone()))
    }

    /// Remove all entries whose policy has fired
    pub fn cleanup_expired(&self) -> Result<Vec<InvalidationEvent>> {
        let mut inner = self.write()?;
        let mut by_reason: HashMap<InvalidationReason, Vec<CacheKey>> = HashMap::new();

        for (key, entry) in &inner.entries {
            if let Some(reason) = entry.invalidation() {
                by_reason.entry(reason).or_default().push(key.clone());
            }
        }

        let mut events = Vec::with_capacity(by_reason.len());
        for (reason, keys) in by_reason {
            for key in &keys {
                inner.remove_entry(key);
            }
            inner.stats.evictions_expired += keys.len() as u64;

            debug!("Cleaned up {} entries ({})", keys.len(), reason);
            let context = format!("Cleaned up {} entries", keys.len());
            events.push(InvalidationEvent::new(reason, keys).with_context(context));
        }

        Ok(events)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize> {
        let mut inner = self.write()?;

        let count = inner.entries.len();
        inner.entries.clear();
        inner.stats.entries = 0;
        inner.stats.invalidations += count as u64;

        info!("Cleared {} entries from memory store", count);
        Ok(count)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = self.read()?.stats.clone();
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        Ok(stats)
    }

    /// Get number of entries in the store, including ones not yet cleaned up
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.entries.is_empty())
    }

    /// Spawn the periodic cleanup task if the configuration asks for it
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_auto_cleanup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enable_auto_cleanup {
            return None;
        }
        Some(tokio::spawn(start_auto_cleanup(Arc::clone(self))))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| CacheError::StoreError("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| CacheError::StoreError("memory store lock poisoned".to_string()))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, counter: &AtomicU64) {
        if self.config.enable_metrics {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop `key` if it is still invalid once the write lock is held
    ///
    /// The entry may have been replaced between releasing the read lock and
    /// taking the write lock, so its policy is evaluated again.
    fn drop_invalid(&self, key: &str) -> Result<()> {
        let mut inner = self.write()?;
        let still_invalid = inner
            .entries
            .get(key)
            .map_or(false, |entry| entry.invalidation().is_some());

        if still_invalid {
            inner.remove_entry(key);
            inner.stats.evictions_expired += 1;
        }
        Ok(())
    }

    /// Internal: make room for one more entry
    fn evict_if_needed(&self, inner: &mut StoreInner) -> Result<()> {
        while inner.entries.len() >= self.config.max_entries {
            if !self.config.enable_lru_eviction {
                warn!("Memory store full ({} entries)", inner.entries.len());
                return Err(CacheError::StoreError(format!(
                    "entry limit of {} reached",
                    self.config.max_entries
                )));
            }

            match inner.least_recently_used() {
                Some(key) => {
                    debug!("Evicting {} ({})", key, InvalidationReason::LeastRecentlyUsed);
                    inner.remove_entry(&key);
                    inner.stats.evictions_lru += 1;
                }
                None => break,
            }
        }

        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_valid_config(CacheConfig::default())
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let inner = self.read()?;

        let Some(entry) = inner.entries.get(key) else {
            self.record(&self.misses);
            return Ok(None);
        };

        if let Some(reason) = entry.invalidation() {
            drop(inner);
            debug!("Dropping {} ({})", key, reason);
            self.drop_invalid(key)?;
            self.record(&self.misses);
            return Ok(None);
        }

        entry.mark_accessed(self.tick());
        self.record(&self.hits);
        Ok(Some(Arc::clone(&entry.value)))
    }

    fn set(&self, key: CacheKey, value: CacheValue, policy: ExpirationPolicy) -> Result<()> {
        let mut entry = CacheEntry::new(key.clone(), value, policy);
        if let ExpirationPolicy::Relative(ttl) = &entry.policy {
            let offset = self.config.jitter_offset(*ttl);
            entry = entry.with_jitter(offset);
        }
        entry.mark_accessed(self.tick());

        let mut inner = self.write()?;

        if let Some(existing) = inner.entries.get_mut(&key) {
            debug!("Updating existing entry: {} ({})", key, entry.policy);
            *existing = entry;
        } else {
            self.evict_if_needed(&mut inner)?;
            debug!("Inserting new entry: {} ({})", key, entry.policy);
            inner.entries.insert(key, entry);
            inner.stats.entries = inner.entries.len();
        }

        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner
            .entries
            .get(key)
            .map_or(false, |entry| entry.invalidation().is_none()))
    }

    fn remove(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut inner = self.write()?;

        let removed = inner.remove_entry(key).map(|entry| entry.value);
        if removed.is_some() {
            inner.stats.invalidations += 1;
            debug!("Removed {} ({})", key, InvalidationReason::Manual);
        }

        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.read()?.entries.keys().cloned().collect())
    }
}

/// Background task for automatic cache cleanup
pub async fn start_auto_cleanup(store: Arc<MemoryStore>) {
    let interval = store.config.cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        match store.cleanup_expired() {
            Ok(events) => {
                if !events.is_empty() {
                    debug!("Auto cleanup: {} events", events.len());
                }
            }
            Err(e) => {
                warn!("Auto cleanup failed: {}", e);
            }
        }
    }
}
