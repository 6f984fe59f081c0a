//! Configuration for the bundled memory store

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix read by [`CacheConfig::from_env`]
pub const ENV_PREFIX: &str = "OUROBOROS_CACHE_";

/// Largest accepted `ttl_jitter`. A jittered entry lives at least half its TTL.
pub const MAX_TTL_JITTER: f64 = 0.5;

/// Configuration for [`MemoryStore`](crate::cache::MemoryStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the store
    pub max_entries: usize,

    /// Evict the least recently used entry once `max_entries` is reached.
    /// When false, inserts beyond the limit are rejected.
    pub enable_lru_eviction: bool,

    /// TTL jitter factor (0.0 - 0.5) applied to relative expirations.
    /// Spreads out the expiry of entries stored together so they are not
    /// all re-acquired at once.
    pub ttl_jitter: f64,

    /// Enable automatic cleanup of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup checks
    pub cleanup_interval: Duration,

    /// Enable hit/miss metrics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            enable_lru_eviction: true,
            // Relative policies are honoured exactly unless asked otherwise
            ttl_jitter: 0.0,
            enable_auto_cleanup: false,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Load configuration from `OUROBOROS_CACHE_*` environment variables
    ///
    /// A `.env` file is read first if present. Unset variables keep their
    /// defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries)?,
            enable_lru_eviction: env_or("ENABLE_LRU_EVICTION", defaults.enable_lru_eviction)?,
            ttl_jitter: env_or("TTL_JITTER", defaults.ttl_jitter)?,
            enable_auto_cleanup: env_or("ENABLE_AUTO_CLEANUP", defaults.enable_auto_cleanup)?,
            cleanup_interval: env_or("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval.as_secs())
                .map(Duration::from_secs)?,
            enable_metrics: env_or("ENABLE_METRICS", defaults.enable_metrics)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CacheError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::ConfigError(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=MAX_TTL_JITTER).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(format!(
                "ttl_jitter must be between 0.0 and {}",
                MAX_TTL_JITTER
            )));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::ConfigError(
                "cleanup_interval must be non-zero when auto cleanup is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Random offset in seconds to add to a relative expiry of `ttl`
    ///
    /// Always within `ttl * MAX_TTL_JITTER` of zero, so the jittered deadline
    /// stays after the insertion time even for an unvalidated config.
    pub fn jitter_offset(&self, ttl: Duration) -> f64 {
        let factor = self.ttl_jitter.clamp(0.0, MAX_TTL_JITTER);
        if factor == 0.0 || factor.is_nan() {
            return 0.0;
        }

        let jitter_range = ttl.as_secs_f64() * factor;
        (rand::random::<f64>() * 2.0 - 1.0) * jitter_range
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    let var = format!("{}{}", ENV_PREFIX, name);
    match std::env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CacheError::ConfigError(format!("invalid value for {}: {:?}", var, raw))),
        Err(_) => Ok(default),
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    enable_lru_eviction: Option<bool>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Enable or disable LRU eviction
    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.enable_lru_eviction = Some(enable);
        self
    }

    /// Set TTL jitter factor (0.0 - 0.5)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            enable_lru_eviction: self
                .enable_lru_eviction
                .unwrap_or(defaults.enable_lru_eviction),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Configuration for memory-constrained environments
    pub fn small() -> Self {
        Self {
            max_entries: 1_000,
            ttl_jitter: 0.15,
            ..Default::default()
        }
    }

    /// Configuration for large-scale deployments
    pub fn large() -> Self {
        Self {
            max_entries: 1_000_000,
            ttl_jitter: 0.10,
            enable_auto_cleanup: true,
            ..Default::default()
        }
    }
}
