//! # Single-Flight Cache-Aside Layer
//!
//! Wraps a key/value store so that an expensive acquisition (a database
//! lookup, a network call, a file read) runs at most once per entry, even when
//! many callers miss on the same entry at once.
//!
//! ## Components
//!
//! - **Key generation** ([`key`]): type-qualified composite keys, so one short
//!   key can hold values of different types without collisions
//! - **Null sentinel** ([`sentinel`]): caches "the acquirer found nothing"
//! - **Keyed locks** ([`lock`]): one mutex per composite key, shared by
//!   blocking and async callers
//! - **Orchestrator** ([`SingleFlightCache`]): double-checked get-or-acquire
//! - **Memory store** ([`MemoryStore`]): a ready-made [`CacheStore`] honouring
//!   absolute, relative and file-change expiration
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{CacheConfig, MemoryStore, SingleFlightCache};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = SingleFlightCache::new(MemoryStore::new(CacheConfig::default())?);
//!
//! let greeting = cache
//!     .get_async_for("greeting", Duration::from_secs(60), || async {
//!         Ok::<_, anyhow::Error>(Some("hello".to_string()))
//!     })
//!     .await?;
//! assert_eq!(greeting.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

pub mod aside;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod lock;
pub mod policy;
pub mod sentinel;
pub mod store;
pub mod types;

pub use aside::SingleFlightCache;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use key::{TypeTag, KEY_PREFIX};
pub use lock::{KeyLockGuard, KeyedLocks};
pub use policy::ExpirationPolicy;
pub use store::{start_auto_cleanup, CacheStore, MemoryStore};
pub use types::{CacheKey, CacheStats, CacheValue};
