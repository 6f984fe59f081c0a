//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Composite cache key, as produced by the key generator
pub type CacheKey = String;

/// Type-erased stored value: either an acquired payload or the null sentinel
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Number of evictions due to the entry limit
    pub evictions_lru: u64,

    /// Number of entries dropped because their expiration policy fired
    pub evictions_expired: u64,

    /// Number of manual removals
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_lru + self.evictions_expired
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.total_evictions()
        )
    }
}
