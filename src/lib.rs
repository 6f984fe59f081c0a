//! # Ouroboros Cache (ouroboros-cache)
//!
//! A cache-aside helper that prevents cache stampedes: for any one entry the
//! expensive acquisition runs at most once, no matter how many callers miss
//! on it concurrently.
//!
//! ## Features
//!
//! - Single-flight acquisition with double-checked locking
//! - Blocking and async entry points that serialise on the same per-key lock
//! - Type-qualified keys and type-scoped bulk clear
//! - Caching of absent results through a null sentinel
//! - Absolute, relative and file-change expiration policies
//! - Pluggable backing store with a bundled in-memory implementation
//!
//! ## Blocking acquisition
//!
//! ```rust
//! use ouroboros_cache::{MemoryStore, SingleFlightCache};
//!
//! # fn main() -> ouroboros_cache::Result<()> {
//! let cache = SingleFlightCache::new(MemoryStore::default());
//!
//! let age = cache.get("age:john", || Ok::<_, anyhow::Error>(Some(35u32)))?;
//! assert_eq!(age, Some(35));
//!
//! // Served from the store, the closure is not called again
//! let age = cache.get::<u32, anyhow::Error, _>("age:john", || unreachable!())?;
//! assert_eq!(age, Some(35));
//! # Ok(())
//! # }
//! ```
//!
//! ## Async acquisition
//!
//! ```no_run
//! use ouroboros_cache::{MemoryStore, SingleFlightCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Arc::new(SingleFlightCache::new(MemoryStore::default()));
//!
//!     let name = cache
//!         .get_async("user:1", || async {
//!             // e.g. a database round trip
//!             Ok::<_, anyhow::Error>(Some("Alice".to_string()))
//!         })
//!         .await?;
//!     println!("user: {:?}", name);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheKey, CacheStats, CacheStore, CacheValue,
    ExpirationPolicy, InvalidationEvent, InvalidationReason, KeyLockGuard, KeyedLocks,
    MemoryStore, SingleFlightCache, TypeTag,
};
pub use error::{CacheError, Result};
